//! Entry point for compiling and instantiating modules
//!
//! An [`Engine`] carries the [`Config`] applied to every instance it creates
//! and the [`ErrorChannel`] failures are recorded in. Unless another channel
//! is injected, that is the creating thread's default channel.

use std::sync::Arc;

use log::debug;

use crate::config::Config;
use crate::error::Error;
use crate::last_error::ErrorChannel;
use crate::parser::{self, module::Module};
use crate::runtime::{Imports, Instance};

#[derive(Debug, Clone)]
pub struct Engine {
    config: Config,
    channel: Arc<ErrorChannel>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Engine {
            config,
            channel: ErrorChannel::current(),
        }
    }

    /// Record failures in `channel` instead of the thread's default channel
    pub fn with_channel(mut self, channel: Arc<ErrorChannel>) -> Self {
        self.channel = channel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> &Arc<ErrorChannel> {
        &self.channel
    }

    /// Decode and validate module bytes
    pub fn compile(&self, bytes: &[u8]) -> Result<Module, Error> {
        self.recorded(compile(bytes))
    }

    /// Compile `bytes` and instantiate the result against `imports`.
    ///
    /// On failure nothing is allocated and the error is recorded in the
    /// engine's channel. Success leaves the channel untouched.
    pub fn instantiate(&self, bytes: &[u8], imports: Imports) -> Result<Instance, Error> {
        self.recorded(self.instantiate_unrecorded(bytes, imports))
    }

    /// [`Engine::instantiate`] without touching the channel, for callers that
    /// record into a channel of their own choosing
    pub(crate) fn instantiate_unrecorded(&self, bytes: &[u8], imports: Imports) -> Result<Instance, Error> {
        compile(bytes).and_then(|module| self.link(module, imports))
    }

    /// Instantiate an already compiled module
    pub fn instantiate_module(&self, module: Module, imports: Imports) -> Result<Instance, Error> {
        self.recorded(self.link(module, imports))
    }

    fn link(&self, module: Module, imports: Imports) -> Result<Instance, Error> {
        Instance::new(module, imports, &self.config, self.channel.clone())
    }

    fn recorded<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(error) = &result {
            self.channel.record_error(error);
        }
        result
    }
}

fn compile(bytes: &[u8]) -> Result<Module, Error> {
    debug!("compiling {} bytes", bytes.len());
    Ok(parser::parse("module", bytes)?)
}
