//! Square and cube grains hosted on a runtime

use bytes::Bytes;
use futures::future::join_all;
use granary_core::{Error, GrainId, GrainKey};
use granary_grains::{
    register_arithmetic_grains, CUBE_GRAIN_TYPE, CUBE_METHOD, SQUARE_GRAIN_TYPE, SQUARE_METHOD,
};
use granary_runtime::{Runtime, RuntimeBuilder};
use uuid::Uuid;

fn runtime() -> Runtime {
    register_arithmetic_grains(RuntimeBuilder::new())
        .unwrap()
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_square_and_cube_values() {
    let runtime = runtime();
    let square = runtime.grain_by_parts(SQUARE_GRAIN_TYPE, Uuid::new_v4()).unwrap();
    let cube = runtime.grain_by_parts(CUBE_GRAIN_TYPE, Uuid::new_v4()).unwrap();

    let cases = [(3i64, 9i64, 27i64), (-2, 4, -8), (0, 0, 0), (1, 1, 1)];
    for (x, squared, cubed) in cases {
        let got: i64 = square.call(SQUARE_METHOD, &x).await.unwrap();
        assert_eq!(got, squared, "SquareMe({})", x);
        let got: i64 = cube.call(CUBE_METHOD, &x).await.unwrap();
        assert_eq!(got, cubed, "CubeMe({})", x);
    }
}

#[tokio::test]
async fn test_raw_payload_invocation() {
    let runtime = runtime();
    let id = GrainId::new(SQUARE_GRAIN_TYPE, "raw").unwrap();

    let result = runtime.invoke(id, SQUARE_METHOD, Bytes::from("12")).await.unwrap();
    assert_eq!(result, Bytes::from("144"));
}

#[tokio::test]
async fn test_overflow_rejected_before_activation() {
    let runtime = runtime();
    let square = runtime.grain_by_parts(SQUARE_GRAIN_TYPE, "big").unwrap();
    let cube = runtime.grain_by_parts(CUBE_GRAIN_TYPE, "big").unwrap();

    let result = square.call::<i64, i64>(SQUARE_METHOD, &3_037_000_500).await;
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));

    let result = cube.call::<i64, i64>(CUBE_METHOD, &2_097_152).await;
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));

    assert_eq!(runtime.active_grain_count(), 0);

    let edge: i64 = cube.call(CUBE_METHOD, &-2_097_152).await.unwrap();
    assert_eq!(edge, i64::MIN);
}

#[tokio::test]
async fn test_method_of_other_type_is_unknown() {
    let runtime = runtime();
    let square = runtime.grain_by_parts(SQUARE_GRAIN_TYPE, "a").unwrap();

    let result = square.call::<i64, i64>(CUBE_METHOD, &2).await;
    assert!(matches!(result, Err(Error::UnknownMethod { .. })));
    assert_eq!(runtime.active_grain_count(), 0);
}

#[tokio::test]
async fn test_nil_key_is_invalid_identity() {
    let runtime = runtime();
    assert!(matches!(
        runtime.grain_by_parts(SQUARE_GRAIN_TYPE, Uuid::nil()),
        Err(Error::InvalidIdentity { .. })
    ));
    assert!(matches!(
        runtime.grain_by_parts(CUBE_GRAIN_TYPE, GrainKey::String(String::new())),
        Err(Error::InvalidIdentity { .. })
    ));
}

#[tokio::test]
async fn test_many_callers_one_square_grain() {
    let runtime = runtime();
    let square = runtime.grain_by_parts(SQUARE_GRAIN_TYPE, "shared").unwrap();

    let calls = (1..=50i64).map(|x| {
        let square = square.clone();
        async move { square.call::<i64, i64>(SQUARE_METHOD, &x).await }
    });
    let results = join_all(calls).await;

    for (x, result) in (1..=50i64).zip(results) {
        assert_eq!(result.unwrap(), x * x);
    }
    assert_eq!(runtime.active_grain_count(), 1);

    runtime.shutdown().await;
    assert_eq!(runtime.active_grain_count(), 0);
}
