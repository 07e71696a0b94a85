pub mod counts;
pub mod enqueue;
pub mod get;
