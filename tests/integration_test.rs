use std::sync::{Arc, Mutex};
use std::thread;

use rand::RngCore;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384};

use tokenkey::adapters::{SoftKey, SoftToken, TokenProfile};
use tokenkey::api::{HashAlgorithm, ImportFlags, InfoKind, KeyAlgorithm, KeyOptions, LoginMode};
use tokenkey::ports::{RetryDecision, RetryUpTo, TokenNotifier};
use tokenkey::{DecryptError, ImportError, KeyState, SignError};

const PEM: &str = include_str!("fixtures/token_rsa2048.pem");
const TOKEN: &str = "integration";
const URL: &str = "pkcs11:token=integration;object=signing%20key;type=private;id=%10%01";

fn soft_token() -> (Arc<SoftToken>, RsaPublicKey) {
    let token = SoftToken::new();
    token.add_token(TokenProfile::new(TOKEN, "1234")).unwrap();
    let key = SoftKey::from_pkcs8_pem("signing key", vec![0x10, 0x01], PEM).unwrap();
    let public = key.public_key();
    token.add_key(TOKEN, key).unwrap();
    (Arc::new(token), public)
}

fn random_payload() -> Vec<u8> {
    let mut payload = vec![0u8; 1024];
    rand::rng().fill_bytes(&mut payload);
    payload
}

#[test]
fn test_sign_data_verifies_with_public_key() {
    let (token, public) = soft_token();
    let mut key = tokenkey::open_key(token, URL).unwrap();
    let data = random_payload();

    let signature = key.sign_data(&data, HashAlgorithm::Sha256).unwrap();

    assert_eq!(key.algorithm(), Some(KeyAlgorithm::Rsa));
    assert_eq!(signature.len(), 256);
    public
        .verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(&data),
            &signature,
        )
        .unwrap();
}

#[test]
fn test_sign_with_other_hashes() {
    let (token, public) = soft_token();
    let mut key = tokenkey::open_key(token, URL).unwrap();

    let signature = key.sign_data(b"payload", HashAlgorithm::Sha384).unwrap();
    public
        .verify(
            Pkcs1v15Sign::new::<Sha384>(),
            &Sha384::digest(b"payload"),
            &signature,
        )
        .unwrap();

    // MD5 has no OID binding in the verifier; check against the raw DigestInfo
    let signature = key.sign_data(b"payload", HashAlgorithm::Md5).unwrap();
    let mut digest_info = tokenkey::logic::digest_info_prefix(HashAlgorithm::Md5).to_vec();
    digest_info.extend_from_slice(&md5::Md5::digest(b"payload"));
    public
        .verify(Pkcs1v15Sign::new_unprefixed(), &digest_info, &signature)
        .unwrap();
}

#[test]
fn test_decrypt_round_trip() {
    let (token, public) = soft_token();
    let mut key = tokenkey::open_key(token, URL).unwrap();
    let secret = &random_payload()[..32];

    let ciphertext = public.encrypt(&mut OsRng, Pkcs1v15Encrypt, secret).unwrap();
    let plaintext = key.decrypt(&ciphertext).unwrap();

    assert_eq!(plaintext, secret);
}

#[test]
fn test_info_and_export() {
    let (token, _) = soft_token();
    let key = tokenkey::open_key(token, URL).unwrap();

    assert_eq!(key.info(InfoKind::Label).as_deref(), Some("signing key"));
    assert_eq!(key.info(InfoKind::IdHex).as_deref(), Some("1001"));
    assert_eq!(key.info(InfoKind::TokenLabel).as_deref(), Some(TOKEN));
    assert_eq!(key.export_url().unwrap(), URL);
}

#[test]
fn test_public_session_cannot_see_private_key() {
    let (token, _) = soft_token();
    let mut key = tokenkey::new_key(Arc::clone(&token));

    let err = key
        .import_url_with_options(
            URL,
            KeyOptions {
                flags: ImportFlags::NONE,
                login: LoginMode::Public,
            },
        )
        .unwrap_err();

    assert!(matches!(err, ImportError::ObjectNotFound { .. }));
    assert_eq!(token.open_sessions().unwrap(), 0);
}

#[test]
fn test_token_reinserted_during_recovery() {
    let (token, public) = soft_token();
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let notifier: Arc<dyn TokenNotifier> = {
        let token = Arc::clone(&token);
        let attempts = Arc::clone(&attempts);
        Arc::new(move |label: &str, attempt: u32| {
            attempts.lock().unwrap().push((label.to_string(), attempt));
            token.insert_token(TOKEN).unwrap();
            RetryDecision::Continue
        })
    };
    let mut key = tokenkey::open_key_with_notifier(
        Arc::clone(&token),
        URL,
        notifier,
        KeyOptions::default(),
    )
    .unwrap();

    token.remove_token(TOKEN).unwrap();
    let signature = key.sign_data(b"after removal", HashAlgorithm::Sha256).unwrap();

    public
        .verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(b"after removal"),
            &signature,
        )
        .unwrap();
    assert_eq!(
        *attempts.lock().unwrap(),
        vec![("signing key".to_string(), 0)]
    );
    assert_eq!(key.state(), KeyState::Bound);
    assert_eq!(token.open_sessions().unwrap(), 1);
}

#[test]
fn test_token_never_returns() {
    let (token, _) = soft_token();
    let mut key = tokenkey::open_key_with_notifier(
        Arc::clone(&token),
        URL,
        Arc::new(RetryUpTo(3)),
        KeyOptions::default(),
    )
    .unwrap();

    token.remove_token(TOKEN).unwrap();
    let err = key.decrypt(&[0u8; 256]).unwrap_err();

    assert!(matches!(
        err,
        DecryptError::RecoveryExhausted { attempts: 1, .. }
    ));
    assert_eq!(key.state(), KeyState::Failed);
}

#[test]
fn test_recovery_declined() {
    let (token, _) = soft_token();
    let mut key = tokenkey::open_key_with_notifier(
        Arc::clone(&token),
        URL,
        Arc::new(RetryUpTo(0)),
        KeyOptions::default(),
    )
    .unwrap();

    token.remove_token(TOKEN).unwrap();
    token.insert_token(TOKEN).unwrap();
    let err = key.sign_hash(&[0u8; 51]).unwrap_err();

    assert!(matches!(err, SignError::RecoveryDeclined { .. }));
}

#[test]
fn test_removal_without_notifier() {
    let (token, _) = soft_token();
    let mut key = tokenkey::open_key(Arc::clone(&token), URL).unwrap();

    token.remove_token(TOKEN).unwrap();
    let err = key.sign_data(b"data", HashAlgorithm::Sha256).unwrap_err();

    assert!(matches!(err, SignError::SignFailed { .. }));
    assert_eq!(key.state(), KeyState::Failed);
}

#[test]
fn test_dispose_and_drop_release_sessions() {
    let (token, _) = soft_token();

    let mut first = tokenkey::open_key(Arc::clone(&token), URL).unwrap();
    let second = tokenkey::open_key(Arc::clone(&token), URL).unwrap();
    assert_eq!(token.open_sessions().unwrap(), 2);

    first.dispose();
    first.dispose();
    assert_eq!(token.open_sessions().unwrap(), 1);

    drop(second);
    assert_eq!(token.open_sessions().unwrap(), 0);
}

#[test]
fn test_handles_share_a_device_across_threads() {
    let (token, public) = soft_token();

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let token = Arc::clone(&token);
            thread::spawn(move || {
                let mut key = tokenkey::open_key(token, URL).unwrap();
                let data = format!("message {}", i);
                let signature = key.sign_data(data.as_bytes(), HashAlgorithm::Sha256).unwrap();
                (data, signature)
            })
        })
        .collect();

    for worker in workers {
        let (data, signature) = worker.join().unwrap();
        public
            .verify(
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(data.as_bytes()),
                &signature,
            )
            .unwrap();
    }
    assert_eq!(token.open_sessions().unwrap(), 0);
}

#[test]
fn test_one_shot_helpers() {
    let (token, public) = soft_token();

    let signature =
        tokenkey::sign_once(Arc::clone(&token), URL, b"once", HashAlgorithm::Sha256).unwrap();
    public
        .verify(
            Pkcs1v15Sign::new::<Sha256>(),
            &Sha256::digest(b"once"),
            &signature,
        )
        .unwrap();

    let ciphertext = public.encrypt(&mut OsRng, Pkcs1v15Encrypt, b"once").unwrap();
    let plaintext = tokenkey::decrypt_once(Arc::clone(&token), URL, &ciphertext).unwrap();
    assert_eq!(plaintext, b"once");
    assert_eq!(token.open_sessions().unwrap(), 0);
}
