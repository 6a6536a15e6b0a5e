//! Command definitions
//!
//! Represents commands sent to the server.

use bytes::Bytes;

/// Conversion into a single command argument.
pub trait ToArg {
    fn to_arg(&self) -> Vec<u8>;
}

impl ToArg for str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

macro_rules! numeric_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
            }
        )*
    };
}

numeric_arg!(i32, i64, u32, u64, usize, isize, f64);

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Vec<u8> {
        (**self).to_arg()
    }
}

/// A command: name followed by its arguments.
///
/// The name is stored as the first wire argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Vec<u8>>,
}

impl Cmd {
    /// Start a command with the given name.
    pub fn new(name: impl ToArg) -> Self {
        Self {
            args: vec![name.to_arg()],
        }
    }

    /// Build a command from already split wire arguments.
    pub fn from_args(args: Vec<Vec<u8>>) -> Self {
        Self { args }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append several arguments.
    pub fn args<T: ToArg>(mut self, args: impl IntoIterator<Item = T>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    /// Append an argument in place.
    pub fn push_arg(&mut self, arg: impl ToArg) {
        self.args.push(arg.to_arg());
    }

    /// Upper-cased command name, e.g. `GET`.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Upper-cased name of a two-word command such as `SCRIPT LOAD`.
    pub fn subcommand(&self) -> Option<String> {
        self.args
            .get(1)
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
    }

    /// Arguments after the command name.
    pub fn params(&self) -> &[Vec<u8>] {
        self.args.get(1..).unwrap_or(&[])
    }

    /// All wire arguments, name first.
    pub fn as_args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Vec<u8>> {
        self.args
    }
}

/// Shorthand for `Cmd::new(name)`.
pub fn cmd(name: &str) -> Cmd {
    Cmd::new(name)
}
