#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use esi_broker::{
	_preludet::*,
	auth::{AccessToken, AccountId, Character, CharacterId, Principal},
	executor::endpoint::IMPLANTS,
	store::StoredCredentials,
};

const CHARACTER_ID: u64 = 90_000_004;

fn principal() -> Principal {
	Principal::new(AccountId::new(4), CharacterId::new(CHARACTER_ID))
}

fn character() -> Character {
	Character::new(CharacterId::new(CHARACTER_ID), "Returning Pilot")
}

#[tokio::test]
async fn login_updates_a_cached_session_in_place() {
	let server = MockServer::start_async().await;
	let (client, store) = build_reqwest_test_client(test_config(&server.base_url()));

	store.insert(principal(), StoredCredentials::new(character(), None));

	let implants_mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/latest/characters/90000004/implants/")
				.header("authorization", "Bearer access-login");
			then.status(200).header("content-type", "application/json").body("[22107]");
		})
		.await;
	let err = client
		.call(&IMPLANTS, &principal(), &[], None)
		.await
		.expect_err("A principal without a token should be told to log in.");

	assert!(err.needs_reauthorization());
	assert!(client.sessions().contains(&principal()));

	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v2/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-login\",\"refresh_token\":\"refresh-login\",\"token_type\":\"Bearer\",\"expires_in\":1199}",
			);
		})
		.await;
	let token = client
		.complete_authorization(&principal(), character(), "login-code")
		.await
		.expect("Code exchange should succeed.");

	token_mock.assert_calls_async(1).await;

	assert_eq!(token.access_token.expose(), "access-login");
	assert_eq!(store.get(&principal()).and_then(|record| record.token), Some(token.clone()));

	let session = client
		.sessions()
		.get(&principal())
		.await
		.expect("Cached session should still be available.");

	assert_eq!(session.credentials().token, Some(token));

	let response = client
		.call(&IMPLANTS, &principal(), &[], None)
		.await
		.expect("Call after login should succeed.");

	implants_mock.assert_calls_async(1).await;

	assert_eq!(response.body, serde_json::json!([22107]));
}

#[tokio::test]
async fn rejected_code_leaves_the_store_untouched() {
	let server = MockServer::start_async().await;
	let (client, store) = build_reqwest_test_client(test_config(&server.base_url()));
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v2/oauth/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(
					"{\"error\":\"invalid_request\",\"error_description\":\"Authorization code not found.\"}",
				);
		})
		.await;
	let err = client
		.complete_authorization(&principal(), character(), "bogus-code")
		.await
		.expect_err("A rejected code should fail.");

	token_mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::ProviderRejected { ref code, .. } if code == "invalid_request"));
	assert!(store.is_empty());
}

#[tokio::test]
async fn authorization_url_carries_client_redirect_state_and_scopes() {
	let server = MockServer::start_async().await;
	let (client, _) = build_reqwest_test_client(test_config(&server.base_url()));
	let url = client
		.authorization_url(
			"state-123",
			&["esi-skills.read_skills.v1", "esi-wallet.read_character_wallet.v1"],
		)
		.expect("Authorization URL should build when a redirect URI is configured.");
	let pairs = url.query_pairs().into_owned().collect::<HashMap<_, _>>();

	assert_eq!(url.path(), "/v2/oauth/authorize");
	assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
	assert_eq!(pairs.get("client_id").map(String::as_str), Some("test-client"));
	assert_eq!(pairs.get("state").map(String::as_str), Some("state-123"));
	assert_eq!(
		pairs.get("redirect_uri").map(String::as_str),
		Some(server.url("/callback").as_str())
	);
	assert_eq!(
		pairs.get("scope").map(String::as_str),
		Some("esi-skills.read_skills.v1 esi-wallet.read_character_wallet.v1")
	);
}

#[tokio::test]
async fn forgetting_a_principal_drops_store_and_cache() {
	let server = MockServer::start_async().await;
	let (client, store) = build_reqwest_test_client(test_config(&server.base_url()));

	store.insert(
		principal(),
		StoredCredentials::new(
			character(),
			Some(AccessToken::new(
				"access-forget",
				OffsetDateTime::now_utc() + Duration::minutes(20),
				"refresh-forget",
			)),
		),
	);
	client.sessions().get(&principal()).await.expect("Seeded principal should load.");

	assert!(client.forget(&principal()).await.expect("Deleting should succeed."));
	assert!(!client.sessions().contains(&principal()));
	assert!(store.is_empty());
	assert!(!client.forget(&principal()).await.expect("Deleting twice should succeed."));

	let err = client
		.call(&IMPLANTS, &principal(), &[], None)
		.await
		.expect_err("A forgotten principal should be unknown.");

	assert!(matches!(err, Error::NoSuchPrincipal { .. }));
}
