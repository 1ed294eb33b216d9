pub mod bucket;
pub mod suffix;
