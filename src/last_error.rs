//! Last-error channel
//!
//! A single slot holding the message of the most recent failure. Each new
//! failure overwrites the previous one; reading never clears it. Lengths are
//! byte lengths of the UTF-8 message with no terminator, and copies never
//! write one.
//!
//! Each thread has its own default channel, so failures on one thread are
//! never observed on another. An [`Engine`](crate::Engine) can be given an
//! explicit channel instead.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::error::Error;

thread_local! {
    static CURRENT: Arc<ErrorChannel> = Arc::new(ErrorChannel::new());
}

#[derive(Debug, Default)]
pub struct ErrorChannel {
    slot: Mutex<Option<String>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        ErrorChannel::default()
    }

    /// The calling thread's default channel
    pub fn current() -> Arc<ErrorChannel> {
        CURRENT.with(Arc::clone)
    }

    /// Run `f` against the calling thread's default channel
    pub fn with_current<R>(f: impl FnOnce(&ErrorChannel) -> R) -> R {
        CURRENT.with(|channel| f(channel))
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        // a panic while holding the lock cannot leave the slot half written
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the recorded message. NUL characters are dropped so the text
    /// can always be handed to C callers.
    pub fn record(&self, message: impl Into<String>) {
        let mut message = message.into();
        message.retain(|c| c != '\0');
        *self.lock() = Some(message);
    }

    pub fn record_error(&self, error: &Error) {
        warn!("{error}");
        self.record(error.to_string());
    }

    /// Byte length of the recorded message, 0 when nothing was recorded
    pub fn length(&self) -> usize {
        self.lock().as_ref().map_or(0, String::len)
    }

    pub fn message(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Copy `min(length, buffer.len())` bytes of the message into `buffer`
    /// and return how many were written.
    pub fn copy_into(&self, buffer: &mut [u8]) -> usize {
        let slot = self.lock();
        let Some(message) = slot.as_ref() else {
            return 0;
        };
        let count = message.len().min(buffer.len());
        buffer[..count].copy_from_slice(&message.as_bytes()[..count]);
        count
    }

    /// Remove and return the recorded message
    pub fn take(&self) -> Option<String> {
        self.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_channel() {
        let channel = ErrorChannel::new();
        assert_eq!(channel.length(), 0);
        assert_eq!(channel.message(), None);
        let mut buffer = [0xaau8; 4];
        assert_eq!(channel.copy_into(&mut buffer), 0);
        assert_eq!(buffer, [0xaa; 4]);
    }

    #[test]
    fn record_overwrites() {
        let channel = ErrorChannel::new();
        channel.record("first failure");
        channel.record("second");
        assert_eq!(channel.message().as_deref(), Some("second"));
        assert_eq!(channel.length(), 6);
    }

    #[test]
    fn queries_are_idempotent() {
        let channel = ErrorChannel::new();
        channel.record("runtime trap: unreachable executed");
        let mut first = vec![0u8; channel.length()];
        let mut second = vec![0u8; channel.length()];
        assert_eq!(channel.copy_into(&mut first), first.len());
        assert_eq!(channel.copy_into(&mut second), second.len());
        assert_eq!(first, second);
        assert_eq!(channel.length(), first.len());
    }

    #[rstest]
    #[case(0, "")]
    #[case(4, "link")]
    #[case(10, "link error")]
    #[case(64, "link error")]
    fn copy_is_truncated_without_terminator(#[case] capacity: usize, #[case] expected: &str) {
        let channel = ErrorChannel::new();
        channel.record("link error");
        let mut buffer = vec![0xffu8; capacity];
        let written = channel.copy_into(&mut buffer);
        assert_eq!(&buffer[..written], expected.as_bytes());
        assert!(buffer[written..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn length_counts_bytes_not_chars() {
        let channel = ErrorChannel::new();
        channel.record("héllo\0wörld");
        assert_eq!(channel.message().as_deref(), Some("héllowörld"));
        assert_eq!(channel.length(), "héllowörld".len());
    }

    #[test]
    fn take_empties_the_slot() {
        let channel = ErrorChannel::new();
        channel.record("boom");
        assert_eq!(channel.take().as_deref(), Some("boom"));
        assert_eq!(channel.length(), 0);
    }

    #[test]
    fn thread_channels_are_independent() {
        ErrorChannel::with_current(|channel| channel.record("main thread failure"));
        std::thread::spawn(|| {
            assert_eq!(ErrorChannel::with_current(ErrorChannel::length), 0);
            ErrorChannel::current().record("worker failure");
        })
        .join()
        .unwrap();
        assert_eq!(
            ErrorChannel::current().message().as_deref(),
            Some("main thread failure")
        );
    }
}
