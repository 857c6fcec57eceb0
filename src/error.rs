use realfft::FftError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("maximum block size must be non-zero")]
    InvalidBlockSize,

    #[error("channel count must be non-zero")]
    InvalidChannelCount,

    #[error("the IR builder has not been prepared")]
    NotPrepared,

    #[error("fft failed: {0}")]
    Fft(#[from] FftError),

    #[error("failed to spawn the IR builder thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
