#![warn(clippy::pedantic)]
use std::fmt;
use std::path::{Path, PathBuf};

use gethostname::gethostname;
use tracing::warn;

/// Why a config value could not be read as the requested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    WrongType,
    OutOfRange(i64),
}

/// Types a config value can be read as.
pub trait FromToml<'a>: Sized {
    const KIND: &'static str;

    /// # Errors
    /// [`Mismatch::OutOfRange`] for integers that do not fit `Self`.
    fn from_toml(value: &'a toml::Value) -> Result<Self, Mismatch>;
}

impl<'a> FromToml<'a> for f64 {
    const KIND: &'static str = "float";

    #[allow(clippy::cast_precision_loss)]
    fn from_toml(value: &'a toml::Value) -> Result<Self, Mismatch> {
        value
            .as_float()
            .or_else(|| value.as_integer().map(|i| i as f64))
            .ok_or(Mismatch::WrongType)
    }
}

impl<'a> FromToml<'a> for bool {
    const KIND: &'static str = "bool";

    fn from_toml(value: &'a toml::Value) -> Result<Self, Mismatch> {
        value.as_bool().ok_or(Mismatch::WrongType)
    }
}

impl<'a> FromToml<'a> for &'a str {
    const KIND: &'static str = "string";

    fn from_toml(value: &'a toml::Value) -> Result<Self, Mismatch> {
        value.as_str().ok_or(Mismatch::WrongType)
    }
}

macro_rules! integer_from_toml {
    ($($t:ty),*) => {$(
        impl<'a> FromToml<'a> for $t {
            const KIND: &'static str = stringify!($t);

            fn from_toml(value: &'a toml::Value) -> Result<Self, Mismatch> {
                let i = value.as_integer().ok_or(Mismatch::WrongType)?;
                <$t>::try_from(i).map_err(|_| Mismatch::OutOfRange(i))
            }
        }
    )*};
}

integer_from_toml!(i64, u16, u32, u64, usize);

fn lookup<'a>(cfg: &'a toml::Value, sec: &str, key: &str) -> Option<&'a toml::Value> {
    cfg.get(sec)?.get(key)
}

fn out_of_range(sec: &str, key: &str, i: i64, kind: &str) -> String {
    format!("{sec}:{key} = {i} is out of range for {kind}")
}

/// # Errors
/// Fails if `sec.key` is missing or cannot be read as `T`.
pub fn get<'a, T: FromToml<'a>>(cfg: &'a toml::Value, sec: &str, key: &str) -> Result<T, String> {
    let value = cfg
        .get(sec)
        .ok_or_else(|| format!("failed to get section {sec}"))?
        .get(key)
        .ok_or_else(|| format!("failed to get key {sec}:{key}"))?;
    T::from_toml(value).map_err(|e| match e {
        Mismatch::WrongType => format!("failed to convert {sec}:{key} to {}", T::KIND),
        Mismatch::OutOfRange(i) => out_of_range(sec, key, i, T::KIND),
    })
}

/// `sec.key` read as `T`, or `or` with a warning when the key is missing or has the wrong type.
///
/// # Errors
/// Fails only for integers that do not fit `T`.
pub fn get_or<'a, T: FromToml<'a> + fmt::Debug>(
    cfg: &'a toml::Value,
    sec: &str,
    key: &str,
    or: T,
) -> Result<T, String> {
    let Some(value) = lookup(cfg, sec, key) else {
        warn!("failed to find {sec}:{key} in config; proceeding with default {or:?}");
        return Ok(or);
    };
    match T::from_toml(value) {
        Ok(v) => Ok(v),
        Err(Mismatch::WrongType) => {
            warn!("failed to convert {sec}:{key} to {}; proceeding with default {or:?}", T::KIND);
            Ok(or)
        }
        Err(Mismatch::OutOfRange(i)) => Err(out_of_range(sec, key, i, T::KIND)),
    }
}

/// `sec.key` read as `T`; `None` when missing or of the wrong type.
///
/// # Errors
/// Fails only for integers that do not fit `T`.
pub fn get_opt<'a, T: FromToml<'a>>(
    cfg: &'a toml::Value,
    sec: &str,
    key: &str,
) -> Result<Option<T>, String> {
    match lookup(cfg, sec, key).map(T::from_toml) {
        None | Some(Err(Mismatch::WrongType)) => Ok(None),
        Some(Ok(v)) => Ok(Some(v)),
        Some(Err(Mismatch::OutOfRange(i))) => Err(out_of_range(sec, key, i, T::KIND)),
    }
}

// The macros return early from the enclosing `Result<_, String>` function.

macro_rules! tomlget {
    ($cfg:expr, $sec:expr, $key:expr) => {
        $crate::util::get($cfg, $sec, $key)?
    };
}

macro_rules! tomlget_or {
    ($cfg:expr, $sec:expr, $key:expr, $or:expr) => {
        $crate::util::get_or($cfg, $sec, $key, $or)?
    };
}

macro_rules! tomlget_opt {
    ($cfg:expr, $sec:expr, $key:expr) => {
        $crate::util::get_opt($cfg, $sec, $key)?
    };
}

/// Resolves `file_name` as given if absolute, otherwise against the working directory and then
/// the directory of the running executable.
#[must_use]
pub fn find_file(file_name: &Path) -> Option<PathBuf> {
    if file_name.is_absolute() {
        return file_name.exists().then(|| file_name.into());
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.join(file_name).exists() {
            return Some(cwd.join(file_name));
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if exe.parent()?.join(file_name).exists() {
            return Some(exe.parent()?.join(file_name));
        }
    }
    None
}

/// # Errors
/// Fails if the hostname is not valid unicode.
pub fn hostname() -> Result<String, String> {
    gethostname()
        .into_string()
        .map_err(|_| "failed to get hostname".to_string())
}

pub(crate) use {tomlget, tomlget_opt, tomlget_or};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_file_resolution() {
        assert!(find_file(Path::new("/definitely/not/a/real/config.toml")).is_none());
        assert!(find_file(Path::new("no_such_config_file.toml")).is_none());
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        assert_eq!(find_file(&manifest), Some(manifest.clone()));
    }

    #[test]
    fn typed_lookups() {
        let cfg: toml::Value = "[a]\nn = -3\nbig = 70000\nx = 2\nname = \"z\"\n"
            .parse()
            .unwrap();
        assert_eq!(get::<i64>(&cfg, "a", "n"), Ok(-3));
        assert_eq!(get::<f64>(&cfg, "a", "x"), Ok(2.0));
        assert_eq!(get::<&str>(&cfg, "a", "name"), Ok("z"));
        assert!(get::<usize>(&cfg, "a", "n").unwrap_err().contains("a:n = -3"));
        assert!(get::<u16>(&cfg, "a", "big").is_err());
        assert!(get::<bool>(&cfg, "a", "missing").unwrap_err().contains("a:missing"));
        assert!(get::<u32>(&cfg, "b", "n").unwrap_err().contains("section b"));

        assert_eq!(get_or(&cfg, "a", "missing", 5_u32), Ok(5));
        assert_eq!(get_or(&cfg, "a", "name", true), Ok(true));
        assert!(get_or(&cfg, "a", "n", 1_u32).is_err());

        assert_eq!(get_opt::<usize>(&cfg, "a", "x"), Ok(Some(2)));
        assert_eq!(get_opt::<usize>(&cfg, "a", "name"), Ok(None));
        assert_eq!(get_opt::<usize>(&cfg, "a", "missing"), Ok(None));
        assert!(get_opt::<usize>(&cfg, "a", "n").is_err());
    }
}
