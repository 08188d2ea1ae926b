/*
    AttoSched

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

        ---------------------------------------------------------------------------
    core::unit::sound.rs

    A sound generator sampled at a fixed rate. Each sample is produced at
    its exact timestamp, so a register write made by a timer callback mid-
    quantum is heard from the first sample after the write.

*/

use std::{any::Any, collections::VecDeque};

use crate::{timebase::Timebase, unit::ExecutableUnit};

pub type AudioSample = f32;

pub const DEFAULT_SAMPLE_BUFFER_LEN: usize = 48_000 / 10;

pub trait SampleSource {
    /// Produce the sample for instant `at`.
    fn sample(&mut self, at: Timebase) -> AudioSample;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub struct SoundStream {
    name: String,
    sample_rate: u32,
    base: Timebase,
    samples: u64,
    source: Box<dyn SampleSource>,
    buffer: VecDeque<AudioSample>,
    buffer_len: usize,
    dropped: u64,
}

impl SoundStream {
    pub fn new(name: impl Into<String>, sample_rate: u32, source: Box<dyn SampleSource>) -> Self {
        Self {
            name: name.into(),
            sample_rate: sample_rate.max(1),
            base: Timebase::ZERO,
            samples: 0,
            source,
            buffer: VecDeque::with_capacity(DEFAULT_SAMPLE_BUFFER_LEN),
            buffer_len: DEFAULT_SAMPLE_BUFFER_LEN,
            dropped: 0,
        }
    }

    /// Limit the number of buffered samples. When the consumer falls behind, the oldest
    /// samples are discarded.
    pub fn with_buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = len.max(1);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn drain_samples(&mut self) -> Vec<AudioSample> {
        self.buffer.drain(..).collect()
    }

    pub fn source_as<T: Any>(&self) -> Option<&T> {
        self.source.as_any().downcast_ref::<T>()
    }

    pub fn source_as_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.source.as_any_mut().downcast_mut::<T>()
    }

    fn time_at(&self, samples: u64) -> Timebase {
        match Timebase::from_ticks(samples, self.sample_rate).and_then(|t| self.base.checked_add(t)) {
            Ok(t) => t,
            Err(_) => Timebase::NEVER,
        }
    }
}

impl ExecutableUnit for SoundStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_time(&self) -> Timebase {
        self.time_at(self.samples)
    }

    fn advance(&mut self, target: Timebase) -> Timebase {
        if target <= self.base {
            return self.local_time();
        }
        let reachable = target
            .checked_sub(self.base)
            .and_then(|span| span.as_ticks(self.sample_rate))
            .unwrap_or(self.samples);

        while self.samples < reachable {
            self.samples += 1;
            let at = self.time_at(self.samples);
            let sample = self.source.sample(at);
            if self.buffer.len() >= self.buffer_len {
                self.buffer.pop_front();
                self.dropped += 1;
            }
            self.buffer.push_back(sample);
        }
        self.local_time()
    }

    fn resync(&mut self, instant: Timebase) {
        if instant > self.local_time() {
            self.base = instant;
            self.samples = 0;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A square wave, toggled by frequency writes. Mostly useful for demos and tests.
#[derive(Debug, Default)]
pub struct SquareWave {
    pub frequency: u32,
    pub amplitude: f32,
}

impl SampleSource for SquareWave {
    fn sample(&mut self, at: Timebase) -> AudioSample {
        if self.frequency == 0 {
            return 0.0;
        }
        // Two half-periods per cycle.
        let half_periods = at.as_ticks(self.frequency.saturating_mul(2)).unwrap_or(0);
        if half_periods % 2 == 0 {
            self.amplitude
        }
        else {
            -self.amplitude
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_sample_per_period() {
        let mut stream = SoundStream::new("psg", 1_000, Box::new(SquareWave::default()));
        assert_eq!(stream.advance(Timebase::from_usec(10_500)), Timebase::from_msec(10));
        assert_eq!(stream.buffered(), 10);
        assert_eq!(stream.drain_samples().len(), 10);
        assert_eq!(stream.buffered(), 0);
    }

    #[test]
    fn frequency_change_is_heard_from_next_sample() {
        let mut stream = SoundStream::new(
            "psg",
            1_000,
            Box::new(SquareWave {
                frequency: 0,
                amplitude: 0.5,
            }),
        );
        stream.advance(Timebase::from_msec(2));
        stream.source_as_mut::<SquareWave>().unwrap().frequency = 100;
        stream.advance(Timebase::from_msec(3));
        assert_eq!(stream.drain_samples(), vec![0.0, 0.0, 0.5]);
    }

    #[test]
    fn overflowing_buffer_drops_oldest() {
        let mut stream = SoundStream::new("psg", 1_000, Box::new(SquareWave::default())).with_buffer_len(4);
        stream.advance(Timebase::from_msec(6));
        assert_eq!(stream.buffered(), 4);
        assert_eq!(stream.dropped(), 2);
    }
}
