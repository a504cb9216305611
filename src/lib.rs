//! An intelligent Zhuyin (Bopomofo) phonetic input method engine.
//!
//! The engine converts keystrokes under one of a dozen keyboard layouts
//! into a preedit buffer of Han characters, resolves ambiguous phonetic
//! sequences into the most likely phrase segmentation using a packed
//! system dictionary plus a learned user phrase store, and exposes a
//! candidate selection protocol to the host application.
//!
//! # Overview
//!
//! * [`zhuyin`] — bopomofo symbols and the packed 16-bit syllable.
//! * [`editor`] — the preedit editor, keyboard layouts and the syllable
//!   state machines.
//! * [`dictionary`] — the read-only system dictionary and the SQLite
//!   backed user phrase store.
//! * [`conversion`] — the phrase segmentation engine.
//!
//! # Examples
//!
//! ```no_run
//! use zhuin::editor::Editor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut editor = Editor::open("/usr/share/zhuin", "/home/user/.zhuin/user.sqlite3")?;
//! for key in "su3cl3".chars() {
//!     editor.handle_default(key);
//! }
//! let output = editor.handle_enter();
//! println!("{}", output.commit);
//! # Ok(())
//! # }
//! ```

pub mod conversion;
pub mod dictionary;
pub mod editor;
pub mod zhuyin;
