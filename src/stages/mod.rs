pub mod runner;
pub mod stage1_transcribe;
pub mod stage2_speakers;
pub mod stage3_export;

pub use runner::*;
pub use stage1_transcribe::*;
pub use stage2_speakers::*;
pub use stage3_export::*;
