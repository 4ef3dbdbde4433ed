mod calculator;

pub use calculator::{fuse_samples, ideal_range, Sample};
