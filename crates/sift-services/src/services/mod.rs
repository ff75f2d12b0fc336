#[cfg(feature = "clamav")]
pub mod clamav;
