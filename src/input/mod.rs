//! Keyboard decoding
//!
//! Compiles the keymap sent by the server with xkbcommon, tracks the
//! modifier state the server reports and turns raw scan codes into keysyms.
//!
//! Until a keymap has compiled successfully every key event is dropped. A
//! keymap that fails to compile leaves the previous keymap and state in
//! place.

use crate::error::KeymapError;
use log::{debug, info};
use memmap2::MmapOptions;
use std::fs::File;
use std::os::fd::OwnedFd;
use xkbcommon::xkb;

/// Offset between evdev scan codes and XKB keycodes.
///
/// The kernel numbers keys from 0 while the X11 keycode space that XKB
/// inherited starts at 8. Compatibility constant, not a computed value.
pub const EVDEV_KEYCODE_OFFSET: u32 = 8;

/// `wl_keyboard.keymap_format.xkb_v1`
pub const KEYMAP_FORMAT_XKB_V1: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

/// One decoded key event
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    /// Server timestamp in milliseconds
    pub time: u32,
    /// Raw scan code as delivered by the server
    pub key: u32,
    /// Resolved keysym, `NoSymbol` unless exactly one symbol resolved
    pub keysym: xkb::Keysym,
    /// Text produced by the key, if any
    pub utf8: Option<String>,
    pub state: KeyState,
}

impl KeyEvent {
    pub fn has_symbol(&self) -> bool {
        u32::from(self.keysym) != xkb::keysyms::KEY_NoSymbol
    }

    pub fn keysym_name(&self) -> String {
        xkb::keysym_get_name(self.keysym)
    }

    pub fn is_press(&self) -> bool {
        self.state == KeyState::Pressed
    }
}

/// Modifier masks and group from `wl_keyboard.modifiers`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// `wl_keyboard.repeat_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatInfo {
    /// Characters per second, 0 disables repeat
    pub rate: i32,
    /// Milliseconds before repeating starts
    pub delay: i32,
}

/// Receives decoded keyboard input.
pub trait KeyHandler {
    fn key(&mut self, event: &KeyEvent);

    /// Keyboard focus entered (`true`) or left (`false`) the surface.
    fn focus(&mut self, focused: bool) {
        let _ = focused;
    }
}

impl<F> KeyHandler for F
where
    F: FnMut(&KeyEvent),
{
    fn key(&mut self, event: &KeyEvent) {
        self(event)
    }
}

/// Keymap, modifier state and focus of the seat's keyboard
pub struct KeyboardDecoder {
    context: xkb::Context,
    keymap: Option<xkb::Keymap>,
    state: Option<xkb::State>,
    modifiers: ModifierState,
    repeat: Option<RepeatInfo>,
    focused: bool,
}

impl Default for KeyboardDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardDecoder {
    pub fn new() -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            keymap: None,
            state: None,
            modifiers: ModifierState::default(),
            repeat: None,
            focused: false,
        }
    }

    pub fn has_keymap(&self) -> bool {
        self.state.is_some()
    }

    pub fn modifiers(&self) -> ModifierState {
        self.modifiers
    }

    pub fn repeat_info(&self) -> Option<RepeatInfo> {
        self.repeat
    }

    pub fn set_repeat_info(&mut self, info: RepeatInfo) {
        debug!("keyboard repeat: rate {} delay {}ms", info.rate, info.delay);
        self.repeat = Some(info);
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// Load the keymap the server shared through `fd`.
    ///
    /// The descriptor is mapped privately, read up to the terminating NUL
    /// and closed before returning.
    pub fn load_keymap_fd(
        &mut self,
        format: u32,
        fd: OwnedFd,
        size: u32,
    ) -> Result<(), KeymapError> {
        if format != KEYMAP_FORMAT_XKB_V1 {
            return Err(KeymapError::UnsupportedFormat(format));
        }

        let file = File::from(fd);
        // SAFETY: private read-only mapping; the server never resizes the
        // keymap file after sending it.
        let map = unsafe {
            MmapOptions::new()
                .len(size as usize)
                .map_copy_read_only(&file)
        }
        .map_err(KeymapError::Map)?;

        let end = map.iter().position(|&b| b == 0).unwrap_or(map.len());
        let text = std::str::from_utf8(&map[..end]).map_err(|_| KeymapError::InvalidUtf8)?;
        self.load_keymap_str(text)
    }

    /// Compile a textual XKB keymap and reset the modifier state for it.
    pub fn load_keymap_str(&mut self, text: &str) -> Result<(), KeymapError> {
        let keymap = xkb::Keymap::new_from_string(
            &self.context,
            text.to_owned(),
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or(KeymapError::Compile)?;

        self.state = Some(xkb::State::new(&keymap));
        self.keymap = Some(keymap);
        self.modifiers = ModifierState::default();
        info!("keymap compiled ({} bytes)", text.len());
        Ok(())
    }

    /// Mask bit of the named modifier in the current keymap
    pub fn modifier_mask(&self, name: &str) -> Option<u32> {
        let index = self.keymap.as_ref()?.mod_get_index(name);
        if index == xkb::MOD_INVALID || index >= 32 {
            return None;
        }
        Some(1 << index)
    }

    /// True if the named modifier is effective in the current state
    pub fn is_modifier_active(&self, name: &str) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE))
    }

    /// Apply `wl_keyboard.modifiers`.
    pub fn update_modifiers(&mut self, modifiers: ModifierState) {
        self.modifiers = modifiers;
        if let Some(state) = self.state.as_mut() {
            state.update_mask(
                modifiers.depressed,
                modifiers.latched,
                modifiers.locked,
                0,
                0,
                modifiers.group,
            );
        }
    }

    pub fn set_focus(&mut self, focused: bool, handler: &mut dyn KeyHandler) {
        self.focused = focused;
        handler.focus(focused);
    }

    /// Translate a raw key event. `None` when no keymap has compiled yet.
    pub fn translate(&self, time: u32, key: u32, key_state: KeyState) -> Option<KeyEvent> {
        let state = self.state.as_ref()?;
        let keycode: xkb::Keycode = key.saturating_add(EVDEV_KEYCODE_OFFSET).into();

        let keysym = state.key_get_one_sym(keycode);
        let utf8 = state.key_get_utf8(keycode);

        Some(KeyEvent {
            time,
            key,
            keysym,
            utf8: (!utf8.is_empty()).then_some(utf8),
            state: key_state,
        })
    }

    /// Translate a key event and pass it to `handler`. Returns whether the
    /// handler was called.
    pub fn handle_key(
        &self,
        time: u32,
        key: u32,
        key_state: KeyState,
        handler: &mut dyn KeyHandler,
    ) -> bool {
        match self.translate(time, key, key_state) {
            Some(event) => {
                debug!(
                    "key {} {:?} -> {}",
                    event.key,
                    event.state,
                    event.keysym_name()
                );
                handler.key(&event);
                true
            }
            None => {
                debug!("key {} dropped, no keymap", key);
                false
            }
        }
    }
}
