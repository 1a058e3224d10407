pub mod ai;
pub mod booking;
pub mod catalog;
pub mod extractor;
pub mod messaging;
