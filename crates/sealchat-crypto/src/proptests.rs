#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use crate::binding::{bind, verify_binding};
    use crate::codec::{open, seal, AuthenticationFailure};
    use crate::primitives::tests::{alice_identity, bob_identity};
    use crate::primitives::{decrypt, encrypt, ExchangeKeyPair, AES_KEY_LEN, NONCE_LEN};
    use crate::session::establish;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // ECDH symmetry
        #[test]
        fn test_agreement_symmetry(_seed in any::<u8>()) {
            let a = ExchangeKeyPair::generate().unwrap();
            let b = ExchangeKeyPair::generate().unwrap();
            prop_assert_eq!(a.agree(b.public_key()), b.agree(a.public_key()));
        }

        // open(seal(p)) == p
        #[test]
        fn test_codec_round_trip(plaintext in prop::collection::vec(any::<u8>(), 0..4096)) {
            let a = ExchangeKeyPair::generate().unwrap();
            let b = ExchangeKeyPair::generate().unwrap();
            let sender = establish(&a, b.public_key());
            let receiver = establish(&b, a.public_key());

            let message = seal(&sender, &plaintext).unwrap();
            prop_assert_eq!(open(&receiver, &message).unwrap(), plaintext);
        }

        // Any single flipped bit in ciphertext or nonce is rejected
        #[test]
        fn test_single_bit_flip_rejected(
            plaintext in prop::collection::vec(any::<u8>(), 1..256),
            bit in any::<usize>(),
            in_nonce in any::<bool>(),
        ) {
            let a = ExchangeKeyPair::generate().unwrap();
            let b = ExchangeKeyPair::generate().unwrap();
            let sender = establish(&a, b.public_key());
            let receiver = establish(&b, a.public_key());

            let mut message = seal(&sender, &plaintext).unwrap();
            if in_nonce {
                let bit = bit % (NONCE_LEN * 8);
                message.nonce[bit / 8] ^= 1 << (bit % 8);
            } else {
                let bit = bit % (message.ciphertext.len() * 8);
                message.ciphertext[bit / 8] ^= 1 << (bit % 8);
            }
            prop_assert_eq!(open(&receiver, &message), Err(AuthenticationFailure));
        }

        #[test]
        fn test_primitive_aead_round_trip(
            key in any::<[u8; AES_KEY_LEN]>(),
            nonce in any::<[u8; NONCE_LEN]>(),
            plaintext in any::<Vec<u8>>(),
        ) {
            let ct = encrypt(&key, &nonce, &plaintext).unwrap();
            prop_assert_eq!(decrypt(&key, &nonce, &ct).unwrap(), plaintext);
        }
    }

    proptest! {
        // RSA-PSS signing is the slow path in debug builds
        #![proptest_config(ProptestConfig::with_cases(8))]

        // Binding soundness: one altered byte anywhere breaks verification
        #[test]
        fn test_binding_soundness(index in any::<usize>(), mask in 1u8..=255) {
            let identity = alice_identity();
            let exchange = ExchangeKeyPair::generate().unwrap();
            let statement = bind(identity, exchange.public_key()).unwrap();
            let spki = statement.exchange_public_key().to_vec();
            let signature = statement.signature().to_vec();

            prop_assert!(verify_binding(identity.public_key(), &spki, &signature));
            prop_assert!(!verify_binding(bob_identity().public_key(), &spki, &signature));

            let mut bad_spki = spki.clone();
            let i = index % bad_spki.len();
            bad_spki[i] ^= mask;
            prop_assert!(!verify_binding(identity.public_key(), &bad_spki, &signature));

            let mut bad_signature = signature.clone();
            let i = index % bad_signature.len();
            bad_signature[i] ^= mask;
            prop_assert!(!verify_binding(identity.public_key(), &spki, &bad_signature));
        }
    }
}
