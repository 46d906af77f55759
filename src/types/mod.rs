pub mod event;
pub mod observation;
pub mod source;
