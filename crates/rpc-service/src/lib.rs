//! The collaborator interface `rpc-transport` dispatches through.
//!
//! Spec §1 puts two things deliberately out of the transport's scope: the
//! request-dispatch layer (a registry mapping a method index to a handler)
//! and the message-encoding library used to pack/unpack payloads. This
//! crate is the seam between them and the transport — it defines what a
//! "service" looks like from the transport's point of view, nothing more.
//! The transport never interprets a [`Message`]'s contents; it only calls
//! `pack`/`packed_size` on it and moves the resulting bytes.

mod error;
#[cfg(feature = "testing")]
pub mod echo;

pub use error::DecodeError;

/// A decoded request or response payload.
///
/// The transport holds these as opaque `Box<dyn Message>` values — it packs
/// them onto the wire and hands decoded ones to the service, but never
/// looks inside.
pub trait Message: Send {
    /// Appends this message's encoded bytes to `out`.
    fn pack(&self, out: &mut Vec<u8>);

    /// The number of bytes `pack` will append. Queried up front so the
    /// frame header's `message_length` can be written before the payload.
    fn packed_size(&self) -> usize;
}

/// Decodes a byte payload into a typed message, or reports why it couldn't.
pub type DecodeFn = fn(&[u8]) -> Result<Box<dyn Message>, DecodeError>;

/// One entry in a service's method table.
pub struct MethodDescriptor {
    pub name: &'static str,
    pub decode_input: DecodeFn,
    pub decode_output: DecodeFn,
}

/// The method table a service advertises. `n_methods()` bounds valid
/// `method_index` values (spec §3: "`method_index` must be strictly less
/// than the collaborator's advertised method count").
pub trait ServiceDescriptor: Send + Sync {
    fn methods(&self) -> &[MethodDescriptor];

    fn n_methods(&self) -> usize {
        self.methods().len()
    }
}

/// Continuation the transport passes to [`Service::invoke`]. Called exactly
/// once with the response payload. May be invoked synchronously, during the
/// `invoke` call itself — callers that capture per-request state by
/// reference rely on this (spec §9).
pub type ResponseClosure<'a> = dyn FnMut(Box<dyn Message>) + 'a;

/// A server-side collaborator: something the transport can hand a decoded
/// request to and expect a response out of, eventually, via `respond`.
pub trait Service: ServiceDescriptor {
    fn invoke(&self, method_index: u32, input: Box<dyn Message>, respond: &mut ResponseClosure<'_>);
}
