pub mod conversion;
pub mod segments;
