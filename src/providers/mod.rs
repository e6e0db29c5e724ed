pub mod llm;
pub mod music;
pub mod storage;

pub use llm::{LlmGenerateRequest, LlmProvider, OpenAiCompatLlm};
pub use music::{HttpMusicProvider, MusicProvider};
pub use storage::{LocalSongStorage, SongStorage};
