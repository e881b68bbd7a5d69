//! A trivial single-method service used by `rpc-transport`'s integration
//! tests (spec §8, scenario 1: "a service with one method whose handler
//! copies input payload bytes to output").

use crate::{DecodeError, Message, MethodDescriptor, ResponseClosure, Service, ServiceDescriptor};

/// A message that is just a byte vector, packed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BytesMessage(pub Vec<u8>);

impl Message for BytesMessage {
    fn pack(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn packed_size(&self) -> usize {
        self.0.len()
    }
}

fn decode_bytes(payload: &[u8]) -> Result<Box<dyn Message>, DecodeError> {
    Ok(Box::new(BytesMessage(payload.to_vec())))
}

/// Method index 0: echo. Copies the input payload to the output verbatim.
pub const ECHO_METHOD: u32 = 0;

/// A one-method service whose sole handler copies its input to its output.
pub struct EchoService {
    methods: [MethodDescriptor; 1],
}

impl Default for EchoService {
    fn default() -> Self {
        Self {
            methods: [MethodDescriptor {
                name: "echo",
                decode_input: decode_bytes,
                decode_output: decode_bytes,
            }],
        }
    }
}

impl ServiceDescriptor for EchoService {
    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

impl Service for EchoService {
    fn invoke(&self, method_index: u32, input: Box<dyn Message>, respond: &mut ResponseClosure<'_>) {
        assert_eq!(method_index, ECHO_METHOD, "EchoService only has one method");
        let mut bytes = Vec::with_capacity(input.packed_size());
        input.pack(&mut bytes);
        respond(Box::new(BytesMessage(bytes)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_input_back() {
        let svc = EchoService::default();
        let mut response = None;
        svc.invoke(ECHO_METHOD, Box::new(BytesMessage(b"hello".to_vec())), &mut |msg| {
            let mut bytes = Vec::new();
            msg.pack(&mut bytes);
            response = Some(bytes);
        });
        assert_eq!(response, Some(b"hello".to_vec()));
    }
}
