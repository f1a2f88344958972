/// Whisper on candle (safetensors checkpoints + `tokenizer.json`).
#[cfg(feature = "candle")]
pub mod candle;
