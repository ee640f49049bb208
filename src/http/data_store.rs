use std::sync::Arc;

use url::Url;

use super::{HttpGateway, ensure_success};
use crate::error::Error;
use crate::traits::{Collection, DataStore, Row};
use crate::types::UserId;

/// [`DataStore`] over the project's REST table API.
///
/// Reads go out with the gateway's current access token so row-level access
/// rules see the signed-in user; without one the public API key is used.
pub struct RestDataStore {
    gateway: Arc<HttpGateway>,
}

impl RestDataStore {
    #[must_use]
    pub fn new(gateway: Arc<HttpGateway>) -> Self {
        Self { gateway }
    }

    /// `GET {table}?select=*&{owner}=eq.{id}&limit=1`
    fn row_url(&self, collection: Collection, user_id: &UserId) -> Result<Url, Error> {
        let mut url = self.gateway.config().rest_url(collection.table())?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair(collection.owner_column(), &format!("eq.{user_id}"))
            .append_pair("limit", "1");
        Ok(url)
    }
}

impl DataStore for RestDataStore {
    async fn fetch_row(
        &self,
        collection: Collection,
        user_id: &UserId,
    ) -> Result<Option<Row>, Error> {
        let config = self.gateway.config();
        let bearer = self
            .gateway
            .current_access_token()
            .map_or_else(|| config.api_key().to_owned(), |t| t.as_str().to_owned());

        let response = self
            .gateway
            .http()
            .get(self.row_url(collection, user_id)?)
            .header("apikey", config.api_key())
            .bearer_auth(bearer)
            .send()
            .await?;
        let response = ensure_success(response, "fetch row").await?;
        let rows = response.json::<Vec<Row>>().await?;

        tracing::trace!(table = collection.table(), found = !rows.is_empty(), "Row fetched");
        Ok(rows.into_iter().next())
    }
}
