//! Pure-data configuration structs. Nothing in this module reads a file or
//! an environment variable; a configuration loader living outside this
//! crate is responsible for producing these values (see the external
//! collaborator boundary in the design notes).

use std::time::Duration;

use crate::common::{Result, Status};

/// Sizing for the two executor task pools (§4.5: Transport and Callback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    num_transport_threads: usize,
    num_callback_threads: usize,
}

impl ExecutorConfig {
    pub fn new(num_transport_threads: usize, num_callback_threads: usize) -> Result<Self> {
        if num_transport_threads == 0 {
            return Err(Status::invalid_argument(
                "num_transport_threads must be at least 1",
            ));
        }
        if num_callback_threads == 0 {
            return Err(Status::invalid_argument(
                "num_callback_threads must be at least 1",
            ));
        }
        Ok(ExecutorConfig {
            num_transport_threads,
            num_callback_threads,
        })
    }

    pub fn num_transport_threads(&self) -> usize {
        self.num_transport_threads
    }

    pub fn num_callback_threads(&self) -> usize {
        self.num_callback_threads
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            num_transport_threads: 1,
            num_callback_threads: 1,
        }
    }
}

/// Minimum size of the contiguous region the frame parser asks for on
/// each read (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageParserConfig {
    pub read_buffer_size: usize,
}

impl MessageParserConfig {
    pub fn new(read_buffer_size: usize) -> Result<Self> {
        if read_buffer_size == 0 {
            return Err(Status::invalid_argument("read_buffer_size must be at least 1"));
        }
        Ok(MessageParserConfig { read_buffer_size })
    }
}

impl Default for MessageParserConfig {
    fn default() -> Self {
        MessageParserConfig {
            read_buffer_size: 64 * 1024,
        }
    }
}

/// Bounded exponential backoff with jitter for the client connector
/// (§4.6, §9 open question resolution): `delay_n = min(max_delay, initial_delay * multiplier^n)`,
/// perturbed by up to ±10%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl ReconnectConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Result<Self> {
        if initial_delay.is_zero() {
            return Err(Status::invalid_argument("initial_delay must be positive"));
        }
        if max_delay < initial_delay {
            return Err(Status::invalid_argument(
                "max_delay must be >= initial_delay",
            ));
        }
        if multiplier < 1.0 {
            return Err(Status::invalid_argument("multiplier must be >= 1.0"));
        }
        Ok(ReconnectConfig {
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Delay before the `attempt`-th reconnection attempt (0-indexed),
    /// including jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Opt-in, process-global logging setup consumed once by
/// [`crate::logging::init_tracing`].
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: tracing::Level,
    pub colorize: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: tracing::Level::INFO,
            colorize: true,
        }
    }
}
