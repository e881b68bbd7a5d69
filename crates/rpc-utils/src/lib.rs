//! Small, dependency-light helpers shared by the `rpc-*` crates.
//!
//! Carried over from the teacher's `flux-utils`: the `safe_panic!` /
//! `safe_assert!` family, used to check invariants (e.g. "pending xor
//! working set membership") without taking a production server down on a
//! violated assumption.

mod assert;
