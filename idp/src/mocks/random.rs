//! Scripted random source.

use crate::crypto::random::RandomSource;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Draws {
    scripted: VecDeque<Vec<u8>>,
    drawn: Vec<Vec<u8>>,
    counter: u8,
}

/// Random source replaying scripted draws.
///
/// Each `fill` consumes one scripted draw. Draws shorter than the buffer are
/// zero padded. Once the script is exhausted every draw is filled with an
/// incrementing counter byte.
#[derive(Debug, Clone, Default)]
pub struct SequenceRandom {
    draws: Arc<Mutex<Draws>>,
}

impl SequenceRandom {
    /// Random source replaying `draws` in order.
    #[must_use]
    pub fn new<I>(draws: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            draws: Arc::new(Mutex::new(Draws {
                scripted: draws.into_iter().collect(),
                ..Draws::default()
            })),
        }
    }

    /// Every draw made so far.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn drawn(&self) -> Vec<Vec<u8>> {
        self.draws.lock().unwrap().drawn.clone()
    }
}

impl RandomSource for SequenceRandom {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    fn fill(&self, buffer: &mut [u8]) -> Result<()> {
        let mut draws = self.draws.lock().unwrap();
        if let Some(draw) = draws.scripted.pop_front() {
            buffer.fill(0);
            let length = draw.len().min(buffer.len());
            buffer[..length].copy_from_slice(&draw[..length]);
        } else {
            draws.counter = draws.counter.wrapping_add(1);
            buffer.fill(draws.counter);
        }
        draws.drawn.push(buffer.to_vec());
        Ok(())
    }
}
