use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("http request failed on `{stage}`: {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("proxy returned status {status} on `{stage}`: {message}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        message: String,
        // The proxy sets this to steer callers straight to local generation.
        fallback: bool,
    },
    #[snafu(display("proxy rate limit exhausted on `{stage}`"))]
    RateLimited { stage: &'static str },
    #[snafu(display("failed to parse proxy envelope on `{stage}`: {source}"))]
    EnvelopeParse {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("proxy envelope rejected on `{stage}`: {details}"))]
    EnvelopeRejected {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("event stream closed without delivering any text on `{stage}`"))]
    EmptyStream { stage: &'static str },
}

impl ProviderError {
    /// Rate limits are surfaced distinctly so callers avoid an immediate
    /// retry storm.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
