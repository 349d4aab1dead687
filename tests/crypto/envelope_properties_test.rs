//! Envelope round-trip and tamper-detection properties.

use proptest::prelude::*;
use redline::crypto::{decrypt, encrypt, EnvelopeMessage, LocalCustodian};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

/// Which envelope component a bit flip lands in.
#[derive(Debug, Clone, Copy)]
enum Part {
    WrappedKey,
    Nonce,
    Ciphertext,
}

fn part_strategy() -> impl Strategy<Value = Part> {
    prop_oneof![
        Just(Part::WrappedKey),
        Just(Part::Nonce),
        Just(Part::Ciphertext),
    ]
}

fn flip(msg: &mut EnvelopeMessage, part: Part, index: usize, bit: u8) {
    let bytes = match part {
        Part::WrappedKey => &mut msg.wrapped_data_key,
        Part::Nonce => &mut msg.nonce,
        Part::Ciphertext => &mut msg.ciphertext,
    };
    let at = index % bytes.len();
    bytes[at] ^= 1 << (bit % 8);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// decrypt(encrypt(P)) == P for arbitrary plaintexts.
    #[test]
    fn roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
        let custodian = LocalCustodian::generate();
        let rt = runtime();
        let msg = rt.block_on(encrypt(&plaintext, &custodian)).expect("encrypt");
        let opened = rt.block_on(decrypt(&msg, &custodian)).expect("decrypt");
        prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    /// Any single-bit flip is rejected, never decrypted to other bytes.
    #[test]
    fn single_bit_flip_is_detected(
        plaintext in prop::collection::vec(any::<u8>(), 1..512),
        part in part_strategy(),
        index in any::<usize>(),
        bit in any::<u8>(),
    ) {
        let custodian = LocalCustodian::generate();
        let rt = runtime();
        let mut msg = rt.block_on(encrypt(&plaintext, &custodian)).expect("encrypt");
        flip(&mut msg, part, index, bit);
        prop_assert!(rt.block_on(decrypt(&msg, &custodian)).is_err());
    }
}

#[tokio::test]
async fn repeated_encryptions_never_share_key_or_nonce() {
    let custodian = LocalCustodian::generate();
    let a = encrypt(b"same input", &custodian).await.expect("encrypt");
    let b = encrypt(b"same input", &custodian).await.expect("encrypt");
    assert_ne!(a.nonce, b.nonce);
    assert_ne!(a.wrapped_data_key, b.wrapped_data_key);
    assert_ne!(a.ciphertext, b.ciphertext);
}
