pub mod comparator;
pub mod encoding;
pub mod extractors;
pub mod fingerprint;
pub mod frame;
pub mod grid_manager;
pub mod lighting;
pub mod pixel;
pub mod smart_pixel;
pub mod tracker;
