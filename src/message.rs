//! Encoding of call arguments, replies and RPC headers.

use bincode::{
    BorrowDecode,
    Encode,
    borrow_decode_from_slice,
    config,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

/// Values that can travel as RPC arguments or replies.
///
/// Anything deriving [`bincode::Encode`] and [`bincode::Decode`] qualifies
/// through the blanket implementation; values are encoded with bincode's
/// standard configuration.
///
/// # Examples
///
/// ```
/// use bidirpc::message::Message;
///
/// #[derive(bincode::Encode, bincode::Decode, Debug, PartialEq)]
/// struct Greeting {
///     text: String,
/// }
///
/// let bytes = Greeting { text: "hi".into() }.to_bytes().expect("encodes");
/// let (decoded, used) = Greeting::from_bytes(&bytes).expect("decodes");
/// assert_eq!(decoded.text, "hi");
/// assert_eq!(used, bytes.len());
/// ```
pub trait Message: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Encode the value into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if the value cannot be encoded.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }

    /// Decode a value from the front of `bytes`, returning it with the number
    /// of bytes consumed. Trailing bytes are left for the caller.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if `bytes` does not start with a valid value.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        borrow_decode_from_slice(bytes, config::standard())
    }
}

impl<T> Message for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}
