use std::collections::HashMap;

use hashpatch::{
    MemoryStore, Patch, Projection, SparseUpdate, StoreError,
    hash::{self, Batch},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    limits: Value,
}

#[derive(Debug, Clone, Default, SparseUpdate)]
#[sparse(normal = Account)]
struct AccountUpdate {
    owner: Option<String>,
    balance: Option<i64>,
    tags: Option<Vec<String>>,
    limits: Option<Value>,
}

fn single_field(name: String, value: Value) -> Patch {
    let mut document = serde_json::Map::new();
    document.insert(name, value);
    Patch::from_value(Value::Object(document)).unwrap()
}

#[tokio::test]
async fn test_merge_then_get_reflects_set_and_prior_fields() {
    let store = MemoryStore::new();
    let mut conn = store.connection();

    let initial = AccountUpdate::from_normal(Account {
        owner: "ada".into(),
        balance: 100,
        tags: vec!["vip".into()],
        limits: json!({ "daily": 50 }),
    });
    hash::merge_update(&mut conn, Some(&initial), "accounts", "a1")
        .await
        .unwrap();

    let update = AccountUpdate {
        balance: Some(75),
        ..Default::default()
    };
    hash::merge_update(&mut conn, Some(&update), "accounts", "a1")
        .await
        .unwrap();

    let account: Account = hash::get(&mut conn, "accounts", "a1").await.unwrap();
    assert_eq!(
        account,
        Account {
            owner: "ada".into(),
            balance: 75,
            tags: vec!["vip".into()],
            limits: json!({ "daily": 50 }),
        }
    );
}

#[tokio::test]
async fn test_applying_the_same_update_twice_is_idempotent() {
    let store = MemoryStore::new();
    let mut conn = store.connection();
    store
        .insert_raw("accounts", "a1", r#"{"owner":"ada","balance":1}"#)
        .await;

    let update = AccountUpdate {
        balance: Some(2),
        tags: Some(vec!["new".into()]),
        ..Default::default()
    };

    hash::merge_update(&mut conn, Some(&update), "accounts", "a1")
        .await
        .unwrap();
    let once = store.raw("accounts", "a1").await.unwrap();

    hash::merge_update(&mut conn, Some(&update), "accounts", "a1")
        .await
        .unwrap();
    let twice = store.raw("accounts", "a1").await.unwrap();

    assert_eq!(
        serde_json::from_str::<Value>(&once).unwrap(),
        serde_json::from_str::<Value>(&twice).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_disjoint_updates_all_survive() {
    let store = MemoryStore::new();
    let fields = 200;

    let mut handles = Vec::with_capacity(fields);
    for i in 0..fields {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = store.connection();
            let patch = single_field(format!("f{i}"), json!(i));
            hash::merge_update(&mut conn, Some(&patch), "wide", "w1")
                .await
                .unwrap();
        }));
    }
    futures::future::join_all(handles).await;

    let mut conn = store.connection();
    let stored: serde_json::Map<String, Value> = hash::get(&mut conn, "wide", "w1").await.unwrap();
    assert_eq!(stored.len(), fields);
    for i in 0..fields {
        assert_eq!(stored.get(&format!("f{i}")), Some(&json!(i)));
    }
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let store = MemoryStore::new();
    let mut conn = store.connection();
    store.insert_raw("accounts", "a1", r#"{"owner":"ada"}"#).await;

    hash::merge_update(&mut conn, None::<&AccountUpdate>, "accounts", "a1")
        .await
        .unwrap();

    let err = hash::get::<Account, _>(&mut conn, "accounts", "a1")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { ref key, ref id } if key == "accounts" && id == "a1"));
}

#[tokio::test]
async fn test_rejected_shape_leaves_prior_state() {
    // Tuple map keys have no JSON object form, so this update cannot be encoded
    #[derive(Default, SparseUpdate)]
    struct GridUpdate {
        balance: Option<i64>,
        cells: Option<HashMap<(u8, u8), String>>,
    }

    let store = MemoryStore::new();
    let mut conn = store.connection();
    let prior = r#"{"owner":"ada","balance":1}"#;
    store.insert_raw("accounts", "a1", prior).await;

    let update = GridUpdate {
        balance: Some(5),
        cells: Some(HashMap::from([((0, 1), "x".to_string())])),
    };

    let err = hash::merge_update(&mut conn, Some(&update), "accounts", "a1")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ShapeViolation(ref m) if m.contains("cells")));
    assert_eq!(store.raw("accounts", "a1").await.as_deref(), Some(prior));

    let mut batch = Batch::new();
    batch
        .merge_update(
            Some(&AccountUpdate {
                balance: Some(7),
                ..Default::default()
            }),
            "accounts",
            "a2",
        )
        .unwrap();
    let err = batch
        .merge_update(Some(&update), "accounts", "a1")
        .unwrap_err();
    assert!(matches!(err, StoreError::ShapeViolation(_)));
    assert_eq!(batch.len(), 1);

    batch.flush(&mut conn).await.unwrap();

    assert_eq!(store.raw("accounts", "a1").await.as_deref(), Some(prior));
    let other: Value = hash::get(&mut conn, "accounts", "a2").await.unwrap();
    assert_eq!(other, json!({ "balance": 7 }));
}

#[tokio::test]
async fn test_rename_all_update_reaches_the_stored_member() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Order {
        unit_price: i64,
        qty: i64,
    }

    #[derive(Default, SparseUpdate)]
    #[sparse(normal = Order)]
    #[serde(rename_all = "camelCase")]
    struct OrderUpdate {
        unit_price: Option<i64>,
        qty: Option<i64>,
    }

    let store = MemoryStore::new();
    let mut conn = store.connection();
    store
        .insert_raw("orders", "o1", r#"{"unitPrice":10,"qty":5}"#)
        .await;

    let update = OrderUpdate {
        unit_price: Some(12),
        ..Default::default()
    };
    hash::merge_update(&mut conn, Some(&update), "orders", "o1")
        .await
        .unwrap();

    let stored: Value = hash::get(&mut conn, "orders", "o1").await.unwrap();
    assert_eq!(stored, json!({ "unitPrice": 12, "qty": 5 }));
    let order: Order = hash::get(&mut conn, "orders", "o1").await.unwrap();
    assert_eq!(order, Order { unit_price: 12, qty: 5 });
}

#[tokio::test]
async fn test_nested_objects_are_replaced_wholesale() {
    let store = MemoryStore::new();
    let mut conn = store.connection();
    store
        .insert_raw(
            "accounts",
            "a1",
            r#"{"owner":"ada","balance":1,"limits":{"daily":50,"monthly":900}}"#,
        )
        .await;

    let update = AccountUpdate {
        limits: Some(json!({ "daily": 80 })),
        ..Default::default()
    };
    hash::merge_update(&mut conn, Some(&update), "accounts", "a1")
        .await
        .unwrap();

    let account: Account = hash::get(&mut conn, "accounts", "a1").await.unwrap();
    assert_eq!(account.limits, json!({ "daily": 80 }));
}

#[tokio::test]
async fn test_partial_price_update_keeps_qty() {
    #[derive(Debug, PartialEq, Deserialize)]
    struct Order {
        price: i64,
        qty: i64,
    }

    #[derive(Default, SparseUpdate)]
    struct OrderUpdate {
        price: Option<i64>,
        qty: Option<i64>,
    }

    let store = MemoryStore::new();
    let mut conn = store.connection();
    store.insert_raw("orders", "o1", r#"{"price": 10, "qty": 5}"#).await;

    let update = OrderUpdate {
        price: Some(12),
        qty: None,
    };
    hash::merge_update(&mut conn, Some(&update), "orders", "o1")
        .await
        .unwrap();

    let order: Order = hash::get(&mut conn, "orders", "o1").await.unwrap();
    assert_eq!(order, Order { price: 12, qty: 5 });
}

#[tokio::test]
async fn test_batched_updates_apply_in_order_on_flush() {
    let store = MemoryStore::new();
    let mut conn = store.connection();

    let mut batch = Batch::new();
    for balance in [1, 2, 3] {
        let update = AccountUpdate {
            balance: Some(balance),
            ..Default::default()
        };
        batch
            .merge_update(Some(&update), "accounts", "a1")
            .unwrap();
    }
    assert_eq!(store.len("accounts").await, 0);

    batch.flush(&mut conn).await.unwrap();

    let stored: Value = hash::get(&mut conn, "accounts", "a1").await.unwrap();
    assert_eq!(stored, json!({ "balance": 3 }));
}
