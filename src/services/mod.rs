pub mod ocr;
pub mod translation;
