use tracing::{debug, info};

use super::{Color, Leds};

/// LED strip stand-in that reports what it would show.
pub struct LogLeds {
    brightness: u32,
}

impl LogLeds {
    pub fn new() -> Self {
        Self { brightness: 255 }
    }
}

impl Default for LogLeds {
    fn default() -> Self {
        Self::new()
    }
}

impl Leds for LogLeds {
    fn startup(&mut self) {
        info!("LEDs: startup");
    }

    fn shutdown(&mut self) {
        info!("LEDs: shutdown");
    }

    fn fade_up_and_down(&mut self, color: Color) {
        debug!("LEDs: fade {:?}", color);
    }

    fn song(&mut self, index: usize, count: usize) {
        debug!("LEDs: song {} of {}", index + 1, count);
    }

    fn level(&mut self, step: usize) {
        debug!("LEDs: level {}", step);
    }

    fn brightness(&self) -> u32 {
        self.brightness
    }

    fn set_brightness(&mut self, brightness: u32) {
        debug!("LEDs: brightness {}", brightness);
        self.brightness = brightness;
    }
}
