use crate::helpers::spawn_app;

#[tokio::test]
async fn the_full_subscription_lifecycle_follows_the_contract() {
    let app = spawn_app().await;
    let body = serde_json::json!({ "email": "a@x.com" });

    let response = app.post_newsletter(&body).await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!("Successfully signed up.", response.text().await.unwrap());

    let response = app.post_newsletter(&body).await;
    assert_eq!(400, response.status().as_u16());
    assert_eq!("Email already subscribed.", response.text().await.unwrap());

    let response = app.get_newsletter("a@x.com").await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!("Email is subscribed.", response.text().await.unwrap());

    let response = app.delete_newsletter("a@x.com").await;
    assert_eq!(200, response.status().as_u16());
    assert_eq!("Successfully unsubscribed.", response.text().await.unwrap());

    let response = app.delete_newsletter("a@x.com").await;
    assert_eq!(404, response.status().as_u16());
    assert_eq!("Email not found.", response.text().await.unwrap());

    let response = app.get_newsletter("a@x.com").await;
    assert_eq!(404, response.status().as_u16());
    assert_eq!("Email not subscribed.", response.text().await.unwrap());
}

#[tokio::test]
async fn subscribing_persists_the_email_to_the_subscriber_file() {
    let app = spawn_app().await;

    app.post_newsletter(&serde_json::json!({ "email": "ursula_le_guin@gmail.com" }))
        .await;

    assert_eq!(app.stored_subscribers(), vec!["ursula_le_guin@gmail.com"]);
}

#[tokio::test]
async fn subscribe_returns_a_400_when_the_email_is_missing_or_empty() {
    let app = spawn_app().await;
    let test_cases = vec![
        (serde_json::json!({}), "missing the email"),
        (serde_json::json!({ "email": "" }), "an empty email"),
        (serde_json::json!({ "email": null }), "a null email"),
    ];

    for (invalid_body, error_message) in test_cases {
        let response = app.post_newsletter(&invalid_body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload was {}.",
            error_message
        );
        assert_eq!("Email is required.", response.text().await.unwrap());
    }
    assert!(app.stored_subscribers().is_empty());
}

#[tokio::test]
async fn subscribe_returns_a_400_for_a_malformed_body() {
    let app = spawn_app().await;

    let response = app.post_newsletter_raw("{ not json").await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn whitespace_emails_in_the_path_are_looked_up_not_rejected() {
    let app = spawn_app().await;

    let response = app.get_newsletter("%20%20").await;
    assert_eq!(404, response.status().as_u16());
    assert_eq!("Email not subscribed.", response.text().await.unwrap());

    let response = app.delete_newsletter("%20").await;
    assert_eq!(404, response.status().as_u16());
    assert_eq!("Email not found.", response.text().await.unwrap());
}

#[tokio::test]
async fn a_whitespace_email_is_an_ordinary_subscriber() {
    let app = spawn_app().await;

    let response = app.post_newsletter(&serde_json::json!({ "email": " " })).await;
    assert_eq!(200, response.status().as_u16());

    assert_eq!(200, app.get_newsletter("%20").await.status().as_u16());
    assert_eq!(404, app.get_newsletter("%20%20").await.status().as_u16());
    assert_eq!(200, app.delete_newsletter("%20").await.status().as_u16());
    assert!(app.stored_subscribers().is_empty());
}

#[tokio::test]
async fn unsubscribing_one_email_leaves_the_others_subscribed() {
    let app = spawn_app().await;
    for email in ["a@x.com", "b@x.com", "c@x.com"] {
        app.post_newsletter(&serde_json::json!({ "email": email }))
            .await;
    }

    app.delete_newsletter("b@x.com").await;

    assert_eq!(200, app.get_newsletter("a@x.com").await.status().as_u16());
    assert_eq!(404, app.get_newsletter("b@x.com").await.status().as_u16());
    assert_eq!(200, app.get_newsletter("c@x.com").await.status().as_u16());
}

#[tokio::test]
async fn emails_are_matched_case_sensitively() {
    let app = spawn_app().await;

    app.post_newsletter(&serde_json::json!({ "email": "a@x.com" }))
        .await;

    assert_eq!(404, app.get_newsletter("A@X.com").await.status().as_u16());
    assert_eq!(404, app.delete_newsletter("A@X.com").await.status().as_u16());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_subscriptions_of_one_email_succeed_exactly_once() {
    let app = spawn_app().await;
    let body = serde_json::json!({ "email": "race@x.com" });

    let responses = send_concurrently(&app, &body, 20).await;

    let accepted = responses.iter().filter(|s| **s == 200).count();
    let rejected = responses.iter().filter(|s| **s == 400).count();
    assert_eq!(accepted, 1);
    assert_eq!(rejected, 19);
    assert_eq!(app.stored_subscribers(), vec!["race@x.com"]);
}

async fn send_concurrently(
    app: &crate::helpers::TestApp,
    body: &serde_json::Value,
    n: usize,
) -> Vec<u16> {
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let request = app
                .api_client
                .post(format!("{}/newsletter", app.address))
                .json(body);
            tokio::spawn(async move {
                request
                    .send()
                    .await
                    .expect("Failed to execute request.")
                    .status()
                    .as_u16()
            })
        })
        .collect();

    let mut statuses = Vec::with_capacity(n);
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    statuses
}

#[tokio::test]
async fn a_corrupt_subscriber_file_yields_503_and_is_left_untouched() {
    let app = spawn_app().await;
    std::fs::write(&app.subscribers_file, "{ definitely not an array").unwrap();

    let response = app
        .post_newsletter(&serde_json::json!({ "email": "a@x.com" }))
        .await;
    assert_eq!(503, response.status().as_u16());
    assert_eq!("Service unavailable.", response.text().await.unwrap());

    assert_eq!(503, app.get_newsletter("a@x.com").await.status().as_u16());
    assert_eq!(503, app.delete_newsletter("a@x.com").await.status().as_u16());

    let contents = std::fs::read_to_string(&app.subscribers_file).unwrap();
    assert_eq!(contents, "{ definitely not an array");
}

#[tokio::test]
async fn the_application_refuses_to_start_on_a_corrupt_subscriber_file() {
    let data_dir = tempfile::TempDir::new().unwrap();
    let configuration = crate::helpers::test_configuration(&data_dir);
    std::fs::write(&configuration.storage.file.path, "[1, 2]").unwrap();

    let outcome = newsletter::startup::Application::build(configuration).await;

    assert!(outcome.is_err());
}

#[tokio::test]
async fn a_missing_subscriber_file_is_created_empty_on_startup() {
    let app = spawn_app().await;

    assert!(app.subscribers_file.exists());
    assert!(app.stored_subscribers().is_empty());
}
