//! The process environment store.
//!
//! [`Environment`] holds an ordered table of `NAME=VALUE` entries behind one table-wide lock.
//! It provides the C-runtime style accessors (`getenv`, `putenv`, `unsetenv`), the Win32
//! accessors with their buffer-size protocol, environment block serialization and `%NAME%`
//! expansion.
//!
//! # Buffer Protocol
//!
//! [`Environment::get_environment_variable`] follows the `GetEnvironmentVariable` double-call
//! convention: a buffer that is too small is left untouched and the call reports the size to
//! retry with, terminator included.
//!
//! ```rust
//! use dotpal::environment::{EnvLookup, Environment};
//!
//! let env = Environment::new(false);
//! env.put("GREETING=hello", false)?;
//!
//! let mut small = [0u8; 3];
//! let EnvLookup::InsufficientBuffer(required) = env.get_environment_variable("GREETING", &mut small)?
//! else { unreachable!() };
//! assert_eq!(required, 6);
//!
//! let mut buffer = vec![0u8; required];
//! assert_eq!(env.get_environment_variable("GREETING", &mut buffer)?, EnvLookup::Copied(5));
//! assert_eq!(&buffer, b"hello\0");
//! # Ok::<(), dotpal::Error>(())
//! ```

mod block;

use std::fmt;

use log::{debug, trace};
use parking_lot::Mutex;
use widestring::U16String;

use crate::{
    config::{EnvironmentConfig, EnvironmentSource},
    Error, Result,
};

/// Outcome of a buffer-filling environment query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvLookup {
    /// The value was copied; holds its length without the terminating NUL.
    Copied(usize),
    /// The buffer was too small and is untouched; holds the size needed including the NUL.
    InsufficientBuffer(usize),
}

/// An ordered, thread-safe table of environment variables.
pub struct Environment {
    entries: Mutex<Vec<(String, String)>>,
    case_insensitive: bool,
}

impl Environment {
    /// Creates an empty environment.
    ///
    /// # Arguments
    ///
    /// * `case_insensitive` - Compare names without regard to ASCII case
    #[must_use]
    pub fn new(case_insensitive: bool) -> Self {
        Environment {
            entries: Mutex::new(Vec::new()),
            case_insensitive,
        }
    }

    /// Creates an environment holding a copy of the host process environment.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    #[must_use]
    pub fn from_process(case_insensitive: bool) -> Self {
        Self::from_entries(
            std::env::vars_os().filter_map(|(name, value)| {
                Some((name.into_string().ok()?, value.into_string().ok()?))
            }),
            case_insensitive,
        )
    }

    /// Creates an environment from `(name, value)` pairs.
    ///
    /// Later duplicates replace earlier ones; pairs with an empty name or a name containing
    /// `=` are skipped.
    #[must_use]
    pub fn from_entries<I, K, V>(entries: I, case_insensitive: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let environment = Self::new(case_insensitive);
        {
            let mut table = environment.entries.lock();
            for (name, value) in entries {
                let name = name.into();
                if name.is_empty() || name.contains('=') {
                    continue;
                }
                environment.store(&mut table, name, value.into());
            }
        }
        environment
    }

    /// Creates an environment as described by `config`.
    #[must_use]
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        match &config.source {
            EnvironmentSource::Inherit => Self::from_process(config.case_insensitive),
            EnvironmentSource::Empty => Self::new(config.case_insensitive),
            EnvironmentSource::Custom(entries) => {
                Self::from_entries(entries.iter().cloned(), config.case_insensitive)
            }
        }
    }

    /// Parses a double-NUL-terminated UTF-8 environment block.
    ///
    /// Entries without `=` or with an empty name are skipped, invalid UTF-8 is replaced, and
    /// parsing stops at the first empty entry. With `case_insensitive`, names differing only
    /// in ASCII case collapse into one variable holding the last value.
    #[must_use]
    pub fn from_block(block: &[u8], case_insensitive: bool) -> Self {
        Self::from_entries(block::decode(block), case_insensitive)
    }

    /// Parses a double-NUL-terminated UTF-16 environment block.
    #[must_use]
    pub fn from_block_w(block: &[u16], case_insensitive: bool) -> Self {
        Self::from_entries(block::decode_wide(block), case_insensitive)
    }

    /// Returns `true` if names are compared without regard to ASCII case.
    #[must_use]
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Returns an owned copy of the value of `name` (`getenv`).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let entries = self.entries.lock();
        self.position(&entries, name)
            .map(|index| entries[index].1.clone())
    }

    /// Returns the value of `name` without taking the table lock.
    ///
    /// # Safety
    ///
    /// No other thread may modify this environment while the returned reference is alive.
    #[must_use]
    pub unsafe fn get_unsafe(&self, name: &str) -> Option<&str> {
        // SAFETY: the caller guarantees there is no concurrent writer.
        let entries = unsafe { &*self.entries.data_ptr() };
        self.position(entries, name)
            .map(|index| entries[index].1.as_str())
    }

    /// Returns `true` if `name` is defined.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.lock();
        self.position(&entries, name).is_some()
    }

    /// Adds, replaces or deletes a variable from a `NAME=VALUE` entry (`putenv`).
    ///
    /// # Arguments
    ///
    /// * `entry` - The entry to store
    /// * `delete_if_empty` - Remove the variable instead when the value is empty
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] when `entry` has no `=` or an empty name.
    pub fn put(&self, entry: &str, delete_if_empty: bool) -> Result<()> {
        let (name, value) = block::split_entry(entry)
            .ok_or(Error::InvalidParameter("entry must have the form NAME=VALUE"))?;

        let mut entries = self.entries.lock();
        if value.is_empty() && delete_if_empty {
            if let Some(index) = self.position(&entries, name) {
                entries.remove(index);
                debug!("environment: removed {name}");
            }
            return Ok(());
        }

        self.store(&mut entries, name.to_string(), value.to_string());
        Ok(())
    }

    /// Removes `name`, returning `true` if it was defined (`unsetenv`).
    pub fn unset(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        match self.position(&entries, name) {
            Some(index) => {
                entries.remove(index);
                debug!("environment: removed {name}");
                true
            }
            None => false,
        }
    }

    /// Copies the value of `name` into `buffer` as a NUL-terminated string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvVarNotFound`] if `name` is not defined.
    pub fn get_environment_variable(&self, name: &str, buffer: &mut [u8]) -> Result<EnvLookup> {
        trace!("get_environment_variable({name}, {} bytes)", buffer.len());
        let entries = self.entries.lock();
        let index = self
            .position(&entries, name)
            .ok_or_else(|| Error::EnvVarNotFound(name.to_string()))?;

        let value = entries[index].1.as_bytes();
        if buffer.len() <= value.len() {
            return Ok(EnvLookup::InsufficientBuffer(value.len() + 1));
        }

        buffer[..value.len()].copy_from_slice(value);
        buffer[value.len()] = 0;
        Ok(EnvLookup::Copied(value.len()))
    }

    /// UTF-16 flavor of [`get_environment_variable`](Self::get_environment_variable); sizes
    /// count UTF-16 code units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvVarNotFound`] if `name` is not defined.
    pub fn get_environment_variable_w(
        &self,
        name: &str,
        buffer: &mut [u16],
    ) -> Result<EnvLookup> {
        let entries = self.entries.lock();
        let index = self
            .position(&entries, name)
            .ok_or_else(|| Error::EnvVarNotFound(name.to_string()))?;

        let value = U16String::from_str(&entries[index].1);
        let value = value.as_slice();
        if buffer.len() <= value.len() {
            return Ok(EnvLookup::InsufficientBuffer(value.len() + 1));
        }

        buffer[..value.len()].copy_from_slice(value);
        buffer[value.len()] = 0;
        Ok(EnvLookup::Copied(value.len()))
    }

    /// Sets or deletes a variable (`SetEnvironmentVariable`).
    ///
    /// # Arguments
    ///
    /// * `name` - Variable name; must be non-empty and free of `=`
    /// * `value` - New value, or `None` to delete the variable
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for an empty name or a name containing `=`
    /// - [`Error::EnvVarNotFound`] when deleting a variable that does not exist
    pub fn set_environment_variable(&self, name: &str, value: Option<&str>) -> Result<()> {
        if name.is_empty() || name.contains('=') {
            return Err(Error::InvalidParameter(
                "variable name must be non-empty and free of '='",
            ));
        }

        match value {
            Some(value) => {
                let mut entries = self.entries.lock();
                self.store(&mut entries, name.to_string(), value.to_string());
                Ok(())
            }
            None if self.unset(name) => Ok(()),
            None => Err(Error::EnvVarNotFound(name.to_string())),
        }
    }

    /// Serializes the table into a double-NUL-terminated UTF-8 block.
    #[must_use]
    pub fn environment_block(&self) -> Vec<u8> {
        let entries = self.entries.lock();
        block::encode(entries.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }

    /// Serializes the table into a double-NUL-terminated UTF-16 block.
    #[must_use]
    pub fn environment_block_w(&self) -> Vec<u16> {
        let entries = self.entries.lock();
        block::encode_wide(entries.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }

    /// Replaces every `%NAME%` reference in `template` with the value of `NAME`
    /// (`ExpandEnvironmentStrings`).
    ///
    /// References to undefined variables are left as they are.
    ///
    /// ```rust
    /// use dotpal::environment::Environment;
    ///
    /// let env = Environment::from_entries([("USER", "pal")], false);
    /// assert_eq!(env.expand("%USER% has %MISSING%"), "pal has %MISSING%");
    /// ```
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        let entries = self.entries.lock();
        let mut expanded = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('%') {
            expanded.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('%') else {
                expanded.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let name = &after[..end];
            match self.position(&entries, name).filter(|_| !name.is_empty()) {
                Some(index) => {
                    expanded.push_str(&entries[index].1);
                    rest = &after[end + 1..];
                }
                None => {
                    expanded.push('%');
                    expanded.push_str(name);
                    rest = &after[end..];
                }
            }
        }

        expanded.push_str(rest);
        expanded
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no variable is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a copy of all `(name, value)` pairs in table order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }

    fn names_match(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn position(&self, entries: &[(String, String)], name: &str) -> Option<usize> {
        entries
            .iter()
            .position(|(candidate, _)| self.names_match(candidate, name))
    }

    fn store(&self, entries: &mut Vec<(String, String)>, name: String, value: String) {
        debug!("environment: {name}={value}");
        match self.position(entries, &name) {
            Some(index) => entries[index].1 = value,
            None => entries.push((name, value)),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(cfg!(windows))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("variables", &self.len())
            .field("case_insensitive", &self.case_insensitive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn put_get_round_trip() {
        let env = Environment::new(false);
        env.put("A=1", false).unwrap();
        assert_eq!(env.get("A").as_deref(), Some("1"));

        env.put("A=2", false).unwrap();
        assert_eq!(env.get("A").as_deref(), Some("2"));
        assert_eq!(env.len(), 1);

        env.put("A=", false).unwrap();
        assert_eq!(env.get("A").as_deref(), Some(""));

        env.put("A=", true).unwrap();
        assert!(!env.contains("A"));
    }

    #[test]
    fn put_rejects_malformed_entries() {
        let env = Environment::new(false);
        assert!(matches!(env.put("NOEQUALS", false), Err(Error::InvalidParameter(_))));
        assert!(matches!(env.put("=value", false), Err(Error::InvalidParameter(_))));
        assert!(env.is_empty());
    }

    #[test]
    fn value_may_contain_equals() {
        let env = Environment::new(false);
        env.put("OPTS=a=b", false).unwrap();
        assert_eq!(env.get("OPTS").as_deref(), Some("a=b"));
    }

    #[test]
    fn case_sensitivity_is_configurable() {
        let sensitive = Environment::new(false);
        sensitive.put("Path=/a", false).unwrap();
        assert!(sensitive.get("PATH").is_none());

        let insensitive = Environment::new(true);
        insensitive.put("Path=/a", false).unwrap();
        insensitive.put("PATH=/b", false).unwrap();
        assert_eq!(insensitive.len(), 1);
        assert_eq!(insensitive.get("path").as_deref(), Some("/b"));
    }

    #[test]
    fn buffer_protocol() {
        let env = Environment::from_entries([("KEY", "value")], false);

        let mut buffer = [0xFFu8; 5];
        assert_eq!(
            env.get_environment_variable("KEY", &mut buffer).unwrap(),
            EnvLookup::InsufficientBuffer(6)
        );
        assert_eq!(buffer, [0xFF; 5]);

        let mut buffer = [0xFFu8; 6];
        assert_eq!(
            env.get_environment_variable("KEY", &mut buffer).unwrap(),
            EnvLookup::Copied(5)
        );
        assert_eq!(&buffer, b"value\0");

        assert!(matches!(
            env.get_environment_variable("NOPE", &mut buffer),
            Err(Error::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn wide_buffer_protocol() {
        let env = Environment::from_entries([("K", "ü€")], false);
        let mut buffer = [0u16; 8];
        assert_eq!(
            env.get_environment_variable_w("K", &mut buffer).unwrap(),
            EnvLookup::Copied(2)
        );
        assert_eq!(&buffer[..3], &[0xFC, 0x20AC, 0]);

        let mut small = [0u16; 2];
        assert_eq!(
            env.get_environment_variable_w("K", &mut small).unwrap(),
            EnvLookup::InsufficientBuffer(3)
        );
    }

    #[test]
    fn set_environment_variable_rules() {
        let env = Environment::new(false);
        env.set_environment_variable("X", Some("1")).unwrap();
        assert_eq!(env.get("X").as_deref(), Some("1"));
        env.set_environment_variable("X", None).unwrap();
        assert!(matches!(
            env.set_environment_variable("X", None),
            Err(Error::EnvVarNotFound(_))
        ));
        assert!(env.set_environment_variable("", Some("1")).is_err());
        assert!(env.set_environment_variable("A=B", Some("1")).is_err());
    }

    #[test]
    fn block_round_trip() {
        let env = Environment::from_entries([("A", "1"), ("B", "two words")], false);
        let copy = Environment::from_block(&env.environment_block(), false);
        assert_eq!(copy.snapshot(), env.snapshot());

        let copy = Environment::from_block_w(&env.environment_block_w(), false);
        assert_eq!(copy.snapshot(), env.snapshot());
    }

    #[test]
    fn block_parsing_honors_case_sensitivity() {
        let block = b"Path=/bin\0PATH=/usr/bin\0\0";

        let sensitive = Environment::from_block(block, false);
        assert!(!sensitive.is_case_insensitive());
        assert_eq!(sensitive.len(), 2);
        assert_eq!(sensitive.get("Path").as_deref(), Some("/bin"));
        assert_eq!(sensitive.get("path"), None);

        let insensitive = Environment::from_block(block, true);
        assert!(insensitive.is_case_insensitive());
        assert_eq!(insensitive.len(), 1);
        assert_eq!(insensitive.get("path").as_deref(), Some("/usr/bin"));

        let wide: Vec<u16> = "Home=/root\0home=/tmp\0\0".encode_utf16().collect();
        let insensitive = Environment::from_block_w(&wide, true);
        assert_eq!(insensitive.get("HOME").as_deref(), Some("/tmp"));
    }

    #[test]
    fn expansion() {
        let env = Environment::from_entries([("A", "x"), ("B", "y")], false);
        assert_eq!(env.expand("%A%-%B%"), "x-y");
        assert_eq!(env.expand("100%"), "100%");
        assert_eq!(env.expand("%%"), "%%");
        assert_eq!(env.expand("%Q%B%"), "%Qy");
        assert_eq!(env.expand("no refs"), "no refs");
    }

    #[test]
    fn unlocked_read() {
        let env = Environment::from_entries([("A", "1")], false);
        assert_eq!(unsafe { env.get_unsafe("A") }, Some("1"));
        assert_eq!(unsafe { env.get_unsafe("B") }, None);
    }

    #[test]
    fn concurrent_writers_keep_names_unique() {
        let env = Arc::new(Environment::new(false));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let env = Arc::clone(&env);
                thread::spawn(move || {
                    for j in 0..100 {
                        env.put(&format!("SHARED={i}-{j}"), false).unwrap();
                        env.put(&format!("T{i}={j}"), false).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(env.len(), 9);
        for i in 0..8 {
            assert_eq!(env.get(&format!("T{i}")).as_deref(), Some("99"));
        }
    }
}
