//! HTTP task store backed by the remote REST service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use crate::session::Session;

use super::types::{NewTask, Task, TaskPage, TaskPatch};
use super::{StoreError, TaskStore};

/// REST client for the task service.
///
/// Every request is bounded by the configured timeout; a timeout surfaces as
/// `StoreError::Transport` like any other network failure.
#[derive(Clone, Debug)]
pub struct HttpTaskStore {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
  username: &'a str,
  password: &'a str,
}

impl HttpTaskStore {
  pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, StoreError> {
    let base_url = Url::parse(base_url)
      .map_err(|e| StoreError::Transport(format!("invalid service url {}: {}", base_url, e)))?;
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| StoreError::Transport(format!("failed to build http client: {}", e)))?;
    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// Exchange credentials for a session with access and refresh tokens.
  pub async fn login(&self, username: &str, password: &str) -> Result<Session, StoreError> {
    let url = self.endpoint("user/login")?;
    let response = self
      .client
      .post(url)
      .json(&LoginBody { username, password })
      .send()
      .await
      .map_err(transport)?;
    let response = check_status(response)?;
    response.json::<Session>().await.map_err(transport)
  }

  fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
    self
      .base_url
      .join(path)
      .map_err(|e| StoreError::Transport(format!("invalid endpoint {}: {}", path, e)))
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
    let url = self.endpoint(path)?;
    let response = self
      .request(reqwest::Method::GET, url)
      .send()
      .await
      .map_err(transport)?;
    let response = check_status(response)?;
    response.json::<T>().await.map_err(transport)
  }
}

fn transport(e: reqwest::Error) -> StoreError {
  StoreError::Transport(e.to_string())
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
  match response.status() {
    StatusCode::NOT_FOUND => Err(StoreError::NotFound),
    status if status.is_success() => Ok(response),
    status => Err(StoreError::Transport(format!(
      "unexpected status {}",
      status
    ))),
  }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
  async fn list(&self, limit: u64, skip: u64) -> Result<TaskPage, StoreError> {
    self
      .get_json(&format!("todos?limit={}&skip={}", limit, skip))
      .await
  }

  async fn get(&self, id: i64) -> Result<Task, StoreError> {
    self.get_json(&format!("todos/{}", id)).await
  }

  async fn random(&self) -> Result<Task, StoreError> {
    self.get_json("todos/random").await
  }

  async fn by_owner(&self, owner_id: i64) -> Result<TaskPage, StoreError> {
    self.get_json(&format!("todos/user/{}", owner_id)).await
  }

  async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
    let url = self.endpoint("todos/add")?;
    let response = self
      .request(reqwest::Method::POST, url)
      .json(&task)
      .send()
      .await
      .map_err(transport)?;
    let response = check_status(response)?;
    response.json::<Task>().await.map_err(transport)
  }

  async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, StoreError> {
    let url = self.endpoint(&format!("todos/{}", id))?;
    let response = self
      .request(reqwest::Method::PUT, url)
      .json(&patch)
      .send()
      .await
      .map_err(transport)?;
    let response = check_status(response)?;
    response.json::<Task>().await.map_err(transport)
  }

  async fn delete(&self, id: i64) -> Result<Task, StoreError> {
    let url = self.endpoint(&format!("todos/{}", id))?;
    let response = self
      .request(reqwest::Method::DELETE, url)
      .send()
      .await
      .map_err(transport)?;
    let response = check_status(response)?;
    response.json::<Task>().await.map_err(transport)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_join() {
    let store =
      HttpTaskStore::new("https://dummyjson.com/", Duration::from_secs(10), None).unwrap();
    let url = store.endpoint("todos/7").unwrap();
    assert_eq!(url.as_str(), "https://dummyjson.com/todos/7");
  }

  #[test]
  fn test_invalid_url_is_transport_error() {
    let err = HttpTaskStore::new("not a url", Duration::from_secs(10), None).unwrap_err();
    assert!(matches!(err, StoreError::Transport(_)));
  }
}
