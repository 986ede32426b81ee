mod ocr;
mod script;
mod speech;

pub use ocr::{OcrEngine, TesseractOcr};
pub use script::{ScriptAuthor, ScriptModel};
pub use speech::{DeepgramSpeech, SpeechSynthesizer};

#[derive(Debug, Clone)]
pub struct BinaryArtifact {
    pub data: Vec<u8>,
    pub media_type: String,
    pub file_extension: String,
}

impl BinaryArtifact {
    pub fn new(
        data: Vec<u8>,
        media_type: impl Into<String>,
        file_extension: impl Into<String>,
    ) -> Self {
        Self {
            data,
            media_type: media_type.into(),
            file_extension: file_extension.into(),
        }
    }
}
