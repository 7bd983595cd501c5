//! Demonstrates logging in, surviving an expired access token through the shared refresh, and
//! logging out, against a local mock API.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use session_broker::{
	client::{LoginCredentials, SessionClient},
	config::SessionConfig,
	dispatch::Navigator,
};

struct PrintingNavigator;
impl Navigator for PrintingNavigator {
	fn current_path(&self) -> Option<String> {
		Some("/dashboard".into())
	}

	fn redirect_to_login(&self, login_path: &str) {
		println!("Session lost; the app would now navigate to {login_path}.");
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/user/auth/login/");
			then.status(200).json_body(json!({
				"access": "demo-access-1",
				"refresh": "demo-refresh",
				"user": { "id": 1, "email": "demo@example.com" },
			}));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/causes/").header("authorization", "Bearer demo-access-1");
			then.status(401).json_body(json!({ "detail": "Token expired." }));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/causes/").header("authorization", "Bearer demo-access-2");
			then.status(200).json_body(json!([{ "id": 7, "title": "Clean water" }]));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/user/auth/token/refresh/");
			then.status(200).json_body(json!({ "access": "demo-access-2" }));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/user/auth/logout/");
			then.status(205);
		})
		.await;

	let config = SessionConfig::parse(&server.url("/api"))?;
	let client = SessionClient::new(config)?.with_navigator(Arc::new(PrintingNavigator));
	let login = client.login(&LoginCredentials::new("demo@example.com", "demo-password")).await?;

	println!("Logged in as {:?}.", login.user.as_ref().and_then(|user| user.email()));

	let causes: Value = client.get("/causes/").await?;

	println!("Fetched {causes} after refreshing the access token.");

	client.logout().await;

	println!("Authenticated after logout: {}.", client.is_authenticated().await);

	Ok(())
}
