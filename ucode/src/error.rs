use common::EncodingError;

use crate::MAX_MICROPROGRAM_STEPS;

#[derive(Debug, thiserror::Error)]
pub enum UcodeError {
    #[error("opcode {0} does not fit in 8 bits")]
    OpcodeOutOfRange(u32),
    #[error("microprogram has {0} steps, at most {max} fit between fetch and sequencer reset", max = MAX_MICROPROGRAM_STEPS)]
    MicroprogramTooLong(usize),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
