//! Property tests over arbitrary object paths and payloads.

use std::sync::Arc;

use envelope::kms::LocalKmsWrapper;
use envelope::{CodecOptions, EnvelopeCodec, ErrorKind, MasterKeyHandle};
use proptest::prelude::*;

fn key() -> MasterKeyHandle {
    MasterKeyHandle::parse("local-kms://prop").unwrap()
}

fn codec() -> EnvelopeCodec {
    EnvelopeCodec::new(
        Arc::new(LocalKmsWrapper::new().with_random_key(key())),
        CodecOptions::default(),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn object_path() -> impl Strategy<Value = String> {
    prop_oneof![
        "gs://[a-z0-9-]{3,20}/[a-zA-Z0-9/_.-]{1,40}",
        // Arbitrary non-empty Unicode, including whitespace and control chars.
        any::<String>().prop_filter("non-empty", |s| !s.is_empty()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn open_inverts_seal(path in object_path(), payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let codec = codec();
        let rt = runtime();
        let opened = rt.block_on(async {
            let sealed = codec.seal_to_bytes(&key(), &path, &payload).await.unwrap();
            codec.open(&key(), &path, &sealed).await.unwrap()
        });
        prop_assert_eq!(opened, payload);
    }

    #[test]
    fn any_other_path_is_rejected(
        path in object_path(),
        other in object_path(),
        payload in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        prop_assume!(path != other);
        let codec = codec();
        let rt = runtime();
        let err = rt.block_on(async {
            let sealed = codec.seal_to_bytes(&key(), &path, &payload).await.unwrap();
            codec.open(&key(), &other, &sealed).await.unwrap_err()
        });
        prop_assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    }

    #[test]
    fn arbitrary_bytes_never_open(path in object_path(), garbage in prop::collection::vec(any::<u8>(), 0..512)) {
        let codec = codec();
        let rt = runtime();
        let err = rt.block_on(codec.open(&key(), &path, &garbage)).unwrap_err();
        prop_assert!(
            matches!(err.kind(), ErrorKind::MalformedEnvelope | ErrorKind::KmsIntegrity),
            "unexpected {:?}", err
        );
    }
}
