use crate::config::Config;
use crate::dispatcher::RequestDispatcher;
use crate::errors::ApiError;
use crate::oauth::OAuthSession;
use crate::services::{
    Account, CatalogElements, Catalogs, Companies, Contacts, CustomFieldGroups, CustomFields,
    EntityTags, Leads, Roles, Segments,
};
use crate::token::TokenState;
use std::sync::Arc;

/// Entry point of the library: one configured account, many entity services.
///
/// Every factory call builds a new dispatcher and a new service. Services are
/// meant to be short-lived; they pin nothing but the shared session, and read
/// the current token on every request.
///
/// Cloning is cheap and clones share the session, so a refresh through one
/// clone is visible to all of them.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<OAuthSession>,
}

impl ApiClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, ApiError> {
        Self::from_config(&Config::new(client_id, client_secret, redirect_uri))
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let session = OAuthSession::from_config(config)?;
        Ok(Self {
            session: Arc::new(session),
        })
    }

    /// Installs a token loaded from storage, bypassing the authorization-code exchange.
    pub fn set_access_token(&mut self, token: TokenState) -> &mut Self {
        self.session.set_access_token(token);
        self
    }

    pub fn set_account_base_domain(&mut self, domain: &str) -> Result<&mut Self, ApiError> {
        self.session.set_base_domain(domain)?;
        Ok(self)
    }

    pub fn account_base_domain(&self) -> Option<String> {
        self.session.account_base_domain()
    }

    /// Registers the handler that receives every rotated token.
    pub fn on_access_token_refresh<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&TokenState) + Send + Sync + 'static,
    {
        self.session.set_access_token_refresh_callback(callback);
        self
    }

    pub fn oauth_client(&self) -> &OAuthSession {
        &self.session
    }

    fn build_request(&self) -> Result<RequestDispatcher, ApiError> {
        if self.session.base_domain().is_none() {
            return Err(ApiError::MissingConfiguration(
                "account base domain is not set; call set_account_base_domain first".to_string(),
            ));
        }
        Ok(RequestDispatcher::new(Arc::clone(&self.session)))
    }

    pub fn leads(&self) -> Result<Leads, ApiError> {
        Ok(Leads::new(self.build_request()?))
    }

    pub fn contacts(&self) -> Result<Contacts, ApiError> {
        Ok(Contacts::new(self.build_request()?))
    }

    pub fn companies(&self) -> Result<Companies, ApiError> {
        Ok(Companies::new(self.build_request()?))
    }

    pub fn catalogs(&self) -> Result<Catalogs, ApiError> {
        Ok(Catalogs::new(self.build_request()?))
    }

    pub fn catalog_elements(&self) -> Result<CatalogElements, ApiError> {
        Ok(CatalogElements::new(self.build_request()?))
    }

    pub fn custom_fields(&self, entity_type: &str) -> Result<CustomFields, ApiError> {
        CustomFields::new(self.build_request()?, entity_type)
    }

    pub fn custom_field_groups(
        &self,
        entity_type: Option<&str>,
    ) -> Result<CustomFieldGroups, ApiError> {
        CustomFieldGroups::new(self.build_request()?, entity_type)
    }

    pub fn tags(&self, entity_type: &str) -> Result<EntityTags, ApiError> {
        EntityTags::new(self.build_request()?, entity_type)
    }

    pub fn account(&self) -> Result<Account, ApiError> {
        Ok(Account::new(self.build_request()?))
    }

    pub fn roles(&self) -> Result<Roles, ApiError> {
        Ok(Roles::new(self.build_request()?))
    }

    pub fn customers_segments(&self) -> Result<Segments, ApiError> {
        Ok(Segments::new(self.build_request()?))
    }
}
