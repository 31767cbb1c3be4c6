mod concurrency;
mod dispatch;
