use kestrel_cache::CacheError;
use kestrel_memo::LoadError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("member descriptor cache used before `setup_member_cache`")]
    MemberCacheNotInitialized,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
