pub mod fal;
pub mod guidance;
pub mod imagery;
pub mod llm;
pub mod outline;
pub mod pipeline;
pub mod tts;
