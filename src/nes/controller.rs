use super::devices::{PadButton, PadInput};

pub const PORT_COUNT: usize = 2;
pub const PAD_COUNT: usize = 4;

/// Shift state for the two controller ports at $4016/$4017.
///
/// Pad `n` is read on bit 0 of port `n`; pad `n + 2` shares the port and is
/// read on bit 1.
pub struct Controllers {
    pads: [Option<Box<dyn PadInput>>; PAD_COUNT],
    strobe: bool,
    bit_index: [u8; PORT_COUNT],
}

impl Default for Controllers {
    fn default() -> Self {
        Self::new()
    }
}

impl Controllers {
    pub fn new() -> Self {
        Self {
            pads: [None, None, None, None],
            strobe: false,
            // Nothing is latched until the first strobe.
            bit_index: [8; PORT_COUNT],
        }
    }

    /// Returns false when `player` has no slot.
    pub fn set_pad(&mut self, player: usize, pad: Option<Box<dyn PadInput>>) -> bool {
        match self.pads.get_mut(player) {
            Some(slot) => {
                *slot = pad;
                true
            }
            None => false,
        }
    }

    pub fn has_pad(&self, player: usize) -> bool {
        self.pads.get(player).is_some_and(Option::is_some)
    }

    pub fn strobe(&self) -> bool {
        self.strobe
    }

    pub fn bit_index(&self, port: usize) -> u8 {
        self.bit_index[port & 1]
    }

    pub fn write_strobe(&mut self, value: u8) {
        let strobe = (value & 0x01) != 0;
        if self.strobe && !strobe {
            self.bit_index = [0; PORT_COUNT];
        }
        self.strobe = strobe;
    }

    pub fn read(&mut self, port: usize) -> u8 {
        let port = port & 1;
        let index = self.bit_index[port];
        let Some(button) = PadButton::from_index(index) else {
            return 0;
        };
        self.bit_index[port] = index + 1;

        let held = |pad: &Option<Box<dyn PadInput>>| {
            pad.as_ref().is_some_and(|pad| pad.button(button))
        };
        u8::from(held(&self.pads[port])) | (u8::from(held(&self.pads[port + 2])) << 1)
    }
}
