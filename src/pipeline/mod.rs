pub mod artifact; // write-once artifact files
pub mod batch;
pub mod model_router; // model fallback selector
pub mod processor;
pub mod rag;
pub mod sleeper;
pub mod storage;
pub mod structuring; // extraction clients, prompt, output parsing
pub mod watch;
