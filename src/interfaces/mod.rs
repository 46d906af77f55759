pub mod detector;
pub mod router;
pub mod sink;
