use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use image::ImageFormat;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    #[envconfig(default = "1000")]
    pub redis_timeout: EnvMsDuration,

    #[envconfig(default = "processing:queue")]
    pub queue_key: NonEmptyString,

    #[envconfig(default = "10")]
    pub batch_size: NonZeroUsize,

    #[envconfig(default = "100")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub error_backoff: EnvMsDuration,

    #[envconfig(default = "3600")]
    pub cache_ttl_secs: u64,

    #[envconfig(default = "1000")]
    pub history_limit: NonZeroUsize,

    #[envconfig(default = "1024")]
    pub notification_capacity: usize,

    #[envconfig(default = "16777216")]
    pub max_request_body_bytes: usize,

    #[envconfig(nested = true)]
    pub vision: VisionConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct VisionConfig {
    #[envconfig(from = "INFERENCE_URL", default = "http://localhost:8501")]
    pub inference_url: NonEmptyString,

    #[envconfig(from = "VISION_TIMEOUT", default = "30000")]
    pub timeout: EnvMsDuration,

    #[envconfig(from = "VISION_MAX_IMAGE_SIZE", default = "10485760")]
    pub max_image_size: usize,

    #[envconfig(from = "VISION_SUPPORTED_FORMATS", default = "jpg,jpeg,png,gif")]
    pub supported_formats: ImageFormats,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// A comma separated list of accepted image file extensions, e.g. `jpg,png`.
/// An empty list accepts any payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageFormats(pub Vec<ImageFormat>);

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownImageFormatError(pub String);

impl FromStr for ImageFormats {
    type Err = UnknownImageFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut formats = Vec::new();

        for extension in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let format = ImageFormat::from_extension(extension)
                .ok_or_else(|| UnknownImageFormatError(extension.to_owned()))?;
            // jpg and jpeg are the same format.
            if !formats.contains(&format) {
                formats.push(format);
            }
        }

        Ok(ImageFormats(formats))
    }
}
