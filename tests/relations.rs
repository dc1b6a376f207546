mod common;

use axum::http::StatusCode;
use common::{app, get, post, seed, send};
use serde_json::json;

#[tokio::test]
async fn has_many_create_list_and_select() {
    let app = app();
    let user = seed(&app, "/users", json!({"name": "Alice"})).await;
    let other = seed(&app, "/users", json!({"name": "Bob"})).await;
    let civic = seed(&app, &format!("/users/{}/cars", user), json!({"model": "Civic"})).await;
    seed(&app, &format!("/users/{}/cars", user), json!({"model": "Golf"})).await;
    seed(&app, &format!("/users/{}/cars", other), json!({"model": "Mini"})).await;

    let res = get(&app, &format!("/users/{}/cars", user)).await;
    assert_eq!(res.status, StatusCode::OK);
    let models: Vec<_> = res.body.as_array().unwrap().iter().map(|c| c["model"].clone()).collect();
    assert_eq!(models, vec![json!("Civic"), json!("Golf")]);

    let res = post(&app, &format!("/users/{}/cars/search", user), json!({"model": "Golf"})).await;
    assert_eq!(res.body.as_array().unwrap().len(), 1);

    let res = get(&app, &format!("/users/{}/cars/{}", user, civic)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["model"], "Civic");
    assert_eq!(res.body["user_id"], user);

    let res = get(&app, &format!("/users/{}/cars/{}", other, civic)).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.message(), "Instance of 'Cars' Not Found");
}

#[tokio::test]
async fn relation_names_are_normalised() {
    let app = app();
    let user = seed(&app, "/users", json!({"name": "Alice"})).await;
    seed(&app, &format!("/users/{}/cars", user), json!({"model": "Civic"})).await;

    for name in ["cars", "Cars", "car"] {
        let res = get(&app, &format!("/users/{}/{}", user, name)).await;
        assert_eq!(res.status, StatusCode::OK, "relation {}", name);
        assert_eq!(res.body.as_array().unwrap().len(), 1);
    }

    let res = get(&app, &format!("/users/{}/boats", user)).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.message(), "Relation 'boats' Not Found On 'Users'");
}

#[tokio::test]
async fn missing_owner_is_404_before_anything_else() {
    let app = app();
    let res = get(&app, "/users/5/cars").await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.message(), "Instance of 'Users' Not Found");

    let res = post(&app, "/users/5/cars", json!({"model": "Civic"})).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = send(&app, "PUT", "/users/5/cars/1", None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.message(), "Instance of 'Users' Not Found");
}

#[tokio::test]
async fn to_one_relations_return_an_object_or_null() {
    let app = app();
    let user = seed(&app, "/users", json!({"name": "Alice"})).await;
    let car = seed(&app, &format!("/users/{}/cars", user), json!({"model": "Civic"})).await;
    let orphan = seed(&app, "/cars", json!({"model": "Beetle"})).await;

    let res = get(&app, &format!("/cars/{}/owner", car)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["name"], "Alice");

    let res = get(&app, &format!("/cars/{}/owner", orphan)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body.is_null());

    let res = get(&app, &format!("/users/{}/profile", user)).await;
    assert!(res.body.is_null());
    seed(&app, &format!("/users/{}/profile", user), json!({"bio": "hi"})).await;
    let res = get(&app, &format!("/users/{}/profile", user)).await;
    assert_eq!(res.body["bio"], "hi");
    assert_eq!(res.body["user_id"], user);
}

#[tokio::test]
async fn belongs_to_create_links_the_owner() {
    let app = app();
    let car = seed(&app, "/cars", json!({"model": "Civic"})).await;
    let res = post(&app, &format!("/cars/{}/owner", car), json!({"name": "Dana"})).await;
    assert_eq!(res.status, StatusCode::CREATED);
    let owner = res.body["id"].clone();

    let res = get(&app, &format!("/cars/{}", car)).await;
    assert_eq!(res.body["user_id"], owner);
}

#[tokio::test]
async fn link_and_unlink_has_many() {
    let app = app();
    let alice = seed(&app, "/users", json!({"name": "Alice"})).await;
    let bob = seed(&app, "/users", json!({"name": "Bob"})).await;
    let car = seed(&app, &format!("/users/{}/cars", alice), json!({"model": "Civic"})).await;

    let res = send(&app, "PUT", &format!("/users/{}/cars/{}", bob, car), None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["user_id"], bob);

    let res = send(&app, "PUT", &format!("/users/{}/cars/{}", bob, car), None).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.message(), "Relation of 'Cars' and 'Users' Already Exists");

    let res = send(&app, "PUT", &format!("/users/{}/cars/999", bob), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.message(), "Instance of 'Cars' Not Found");

    let res = send(&app, "DELETE", &format!("/users/{}/cars/{}", alice, car), None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!(0));

    let res = send(&app, "DELETE", &format!("/users/{}/cars/{}", bob, car), None).await;
    assert_eq!(res.body, json!(1));
    let res = get(&app, &format!("/cars/{}", car)).await;
    assert!(res.body["user_id"].is_null());

    // Unlinked rows no longer block deleting the former owner.
    let res = send(&app, "DELETE", &format!("/users/{}", bob), None).await;
    assert_eq!(res.status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn link_and_unlink_belongs_to() {
    let app = app();
    let alice = seed(&app, "/users", json!({"name": "Alice"})).await;
    let car = seed(&app, "/cars", json!({"model": "Civic"})).await;

    let res = send(&app, "PUT", &format!("/cars/{}/owner/{}", car, alice), None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["user_id"], alice);

    let res = send(&app, "PUT", &format!("/cars/{}/owner/{}", car, alice), None).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.message(), "Relation of 'Users' and 'Cars' Already Exists");

    let res = send(&app, "PUT", &format!("/cars/{}/owner/404", car), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = send(&app, "DELETE", &format!("/cars/{}/owner/{}", car, alice), None).await;
    assert_eq!(res.body, json!(1));
    let res = get(&app, &format!("/cars/{}/owner", car)).await;
    assert!(res.body.is_null());
}

#[tokio::test]
async fn many_to_many_through_join_table() {
    let app = app();
    let alice = seed(&app, "/users", json!({"name": "Alice"})).await;
    let admins = seed(&app, "/groups", json!({"name": "Admins"})).await;

    let res = send(&app, "PUT", &format!("/users/{}/groups/{}", alice, admins), None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({"user_id": alice, "group_id": admins}));

    let res = send(&app, "PUT", &format!("/users/{}/groups/{}", alice, admins), None).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.message(), "Relation of 'Groups' and 'Users' Already Exists");

    let res = send(&app, "PUT", &format!("/users/{}/groups/77", alice), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.message(), "Instance of 'Groups' Not Found");

    let res = post(&app, &format!("/users/{}/groups", alice), json!({"name": "Staff"})).await;
    assert_eq!(res.status, StatusCode::CREATED);

    let res = get(&app, &format!("/users/{}/groups", alice)).await;
    let names: Vec<_> = res.body.as_array().unwrap().iter().map(|g| g["name"].clone()).collect();
    assert_eq!(names, vec![json!("Admins"), json!("Staff")]);

    // Visible from the other side of the join table too.
    let res = get(&app, &format!("/groups/{}/users", admins)).await;
    assert_eq!(res.body[0]["name"], "Alice");

    let res = get(&app, &format!("/users/{}/groups/{}", alice, admins)).await;
    assert_eq!(res.body["name"], "Admins");

    let res = send(&app, "DELETE", &format!("/users/{}/groups/{}", alice, admins), None).await;
    assert_eq!(res.body, json!(1));
    let res = get(&app, &format!("/users/{}/groups", alice)).await;
    assert_eq!(res.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_a_linked_row_drops_its_join_rows() {
    let app = app();
    let alice = seed(&app, "/users", json!({"name": "Alice"})).await;
    let admins = seed(&app, "/groups", json!({"name": "Admins"})).await;
    send(&app, "PUT", &format!("/users/{}/groups/{}", alice, admins), None).await;

    let res = send(&app, "DELETE", &format!("/groups/{}", admins), None).await;
    assert_eq!(res.status, StatusCode::ACCEPTED);
    let res = get(&app, &format!("/users/{}/groups", alice)).await;
    assert_eq!(res.body, json!([]));
}

#[tokio::test]
async fn rows_created_through_a_relation_are_validated() {
    let app = app();
    let admins = seed(&app, "/groups", json!({"name": "Admins"})).await;
    let long_name = "x".repeat(41);

    let res = post(&app, "/users", json!({"name": long_name})).await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);

    let res = post(&app, &format!("/groups/{}/users", admins), json!({"name": long_name})).await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(res.message().contains("name"));

    let res = post(&app, &format!("/groups/{}/users", admins), json!({})).await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);

    let res = get(&app, &format!("/groups/{}/users", admins)).await;
    assert_eq!(res.body, json!([]));
    assert_eq!(get(&app, "/users").await.body, json!([]));

    let res = post(&app, &format!("/groups/{}/users", admins), json!({"name": "Alice"})).await;
    assert_eq!(res.status, StatusCode::CREATED);
}
