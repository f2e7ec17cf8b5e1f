//! Entity services.
//!
//! Each service owns one [`RequestDispatcher`] and maps its operations onto
//! resource paths. Bodies are passed through as JSON; interpreting them is up
//! to the caller. Errors are wrapped with the resource and operation, never
//! swallowed.

use crate::dispatcher::RequestDispatcher;
use crate::entity_type::EntityType;
use crate::errors::{ApiError, ResultExt};
use serde_json::{json, Value};
use std::time::Duration;
use urlencoding::encode;

/// Entity types custom fields can be scoped to.
pub const CUSTOM_FIELD_ENTITY_TYPES: &[EntityType] = &EntityType::ALL;

/// Entity types custom field groups can be scoped to.
pub const CUSTOM_FIELD_GROUP_ENTITY_TYPES: &[EntityType] = &[
    EntityType::Leads,
    EntityType::Contacts,
    EntityType::Companies,
    EntityType::Customers,
];

/// Entity types tags can be scoped to.
pub const TAG_ENTITY_TYPES: &[EntityType] = &[
    EntityType::Leads,
    EntityType::Contacts,
    EntityType::Companies,
    EntityType::Customers,
];

/// Behaviour shared by every entity service.
pub trait EntityService: Sized {
    fn dispatcher(&self) -> &RequestDispatcher;

    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher;

    /// Per-call timeout for every request this service issues.
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher_mut().set_timeout(timeout);
        self
    }
}

/// Query parameters for list endpoints. Filter and cursor semantics belong to
/// the API; these are passed through as-is.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub with: Vec<String>,
    pub filter: Vec<(String, String)>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.with.push(relation.into());
        self
    }

    /// Adds `filter[{field}]={value}`.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.push((field.into(), value.into()));
        self
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        if let Some(page) = self.page {
            query.push(("page".to_string(), page.to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        if !self.with.is_empty() {
            query.push(("with".to_string(), self.with.join(",")));
        }
        for (field, value) in &self.filter {
            query.push((format!("filter[{}]", field), value.clone()));
        }
        query
    }
}

// The API takes collections for add/update, even for a single entity.
fn as_batch(items: &Value) -> Value {
    match items {
        Value::Array(_) => items.clone(),
        other => json!([other]),
    }
}

fn with_query(with: &[&str]) -> Vec<(String, String)> {
    if with.is_empty() {
        Vec::new()
    } else {
        vec![("with".to_string(), with.join(","))]
    }
}

/// Escapes a caller-supplied string id so it stays one path segment under the
/// resource path.
fn id_segment(id: &str) -> Result<String, ApiError> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(ApiError::MissingConfiguration(format!(
            "invalid resource id '{}'",
            id
        )));
    }
    Ok(encode(id).into_owned())
}

async fn list(d: &RequestDispatcher, path: &str, params: &ListParams) -> Result<Value, ApiError> {
    d.get(path, &params.to_query())
        .await
        .with_context(|| format!("{}: list", path))
}

async fn get_one(
    d: &RequestDispatcher,
    path: &str,
    id: u64,
    with: &[&str],
) -> Result<Value, ApiError> {
    d.get(&format!("{}/{}", path, id), &with_query(with))
        .await
        .with_context(|| format!("{}: get {}", path, id))
}

async fn add(d: &RequestDispatcher, path: &str, items: &Value) -> Result<Value, ApiError> {
    d.post(path, &as_batch(items))
        .await
        .with_context(|| format!("{}: add", path))
}

async fn update(d: &RequestDispatcher, path: &str, items: &Value) -> Result<Value, ApiError> {
    d.patch(path, &as_batch(items))
        .await
        .with_context(|| format!("{}: update", path))
}

async fn update_one(
    d: &RequestDispatcher,
    path: &str,
    id: u64,
    item: &Value,
) -> Result<Value, ApiError> {
    d.patch(&format!("{}/{}", path, id), item)
        .await
        .with_context(|| format!("{}: update {}", path, id))
}

async fn delete_one(d: &RequestDispatcher, path: &str, id: u64) -> Result<Value, ApiError> {
    d.delete(&format!("{}/{}", path, id))
        .await
        .with_context(|| format!("{}: delete {}", path, id))
}

// ============ Leads / Contacts / Companies ============

pub struct Leads {
    dispatcher: RequestDispatcher,
}

impl Leads {
    const PATH: &'static str = "leads";

    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, Self::PATH, params).await
    }

    pub async fn get_one(&self, id: u64, with: &[&str]) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, Self::PATH, id, with).await
    }

    pub async fn add(&self, leads: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, Self::PATH, leads).await
    }

    /// Creates leads together with their embedded contacts and companies.
    pub async fn add_complex(&self, leads: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, "leads/complex", leads).await
    }

    pub async fn update(&self, leads: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, Self::PATH, leads).await
    }

    pub async fn update_one(&self, id: u64, lead: &Value) -> Result<Value, ApiError> {
        update_one(&self.dispatcher, Self::PATH, id, lead).await
    }
}

pub struct Contacts {
    dispatcher: RequestDispatcher,
}

impl Contacts {
    const PATH: &'static str = "contacts";

    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, Self::PATH, params).await
    }

    pub async fn get_one(&self, id: u64, with: &[&str]) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, Self::PATH, id, with).await
    }

    pub async fn add(&self, contacts: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, Self::PATH, contacts).await
    }

    pub async fn update(&self, contacts: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, Self::PATH, contacts).await
    }

    pub async fn update_one(&self, id: u64, contact: &Value) -> Result<Value, ApiError> {
        update_one(&self.dispatcher, Self::PATH, id, contact).await
    }
}

pub struct Companies {
    dispatcher: RequestDispatcher,
}

impl Companies {
    const PATH: &'static str = "companies";

    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, Self::PATH, params).await
    }

    pub async fn get_one(&self, id: u64, with: &[&str]) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, Self::PATH, id, with).await
    }

    pub async fn add(&self, companies: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, Self::PATH, companies).await
    }

    pub async fn update(&self, companies: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, Self::PATH, companies).await
    }

    pub async fn update_one(&self, id: u64, company: &Value) -> Result<Value, ApiError> {
        update_one(&self.dispatcher, Self::PATH, id, company).await
    }
}

// ============ Catalogs ============

pub struct Catalogs {
    dispatcher: RequestDispatcher,
}

impl Catalogs {
    const PATH: &'static str = "catalogs";

    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, Self::PATH, params).await
    }

    pub async fn get_one(&self, id: u64) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, Self::PATH, id, &[]).await
    }

    pub async fn add(&self, catalogs: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, Self::PATH, catalogs).await
    }

    pub async fn update(&self, catalogs: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, Self::PATH, catalogs).await
    }
}

/// Elements of one catalog. The catalog id has to be set before any call.
pub struct CatalogElements {
    dispatcher: RequestDispatcher,
    catalog_id: Option<u64>,
}

impl CatalogElements {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self {
            dispatcher,
            catalog_id: None,
        }
    }

    pub fn for_catalog(mut self, catalog_id: u64) -> Self {
        self.catalog_id = Some(catalog_id);
        self
    }

    pub fn catalog_id(&self) -> Option<u64> {
        self.catalog_id
    }

    fn path(&self) -> Result<String, ApiError> {
        self.catalog_id
            .map(|id| format!("catalogs/{}/elements", id))
            .ok_or_else(|| {
                ApiError::MissingConfiguration(
                    "catalog id is not set; call for_catalog first".to_string(),
                )
            })
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, &self.path()?, params).await
    }

    pub async fn get_one(&self, id: u64) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, &self.path()?, id, &[]).await
    }

    pub async fn add(&self, elements: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, &self.path()?, elements).await
    }

    pub async fn update(&self, elements: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, &self.path()?, elements).await
    }
}

// ============ Custom fields ============

pub struct CustomFields {
    dispatcher: RequestDispatcher,
    entity_type: EntityType,
    catalog_id: Option<u64>,
}

impl CustomFields {
    pub fn new(dispatcher: RequestDispatcher, entity_type: &str) -> Result<Self, ApiError> {
        Ok(Self {
            dispatcher,
            entity_type: EntityType::parse_scoped(entity_type, CUSTOM_FIELD_ENTITY_TYPES)?,
            catalog_id: None,
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// Catalog fields live under `catalogs/{id}/custom_fields`.
    pub fn for_catalog(mut self, catalog_id: u64) -> Self {
        self.catalog_id = Some(catalog_id);
        self
    }

    fn path(&self) -> Result<String, ApiError> {
        match (self.entity_type, self.catalog_id) {
            (EntityType::Catalogs, Some(id)) => Ok(format!("catalogs/{}/custom_fields", id)),
            (EntityType::Catalogs, None) => Err(ApiError::MissingConfiguration(
                "catalog custom fields need a catalog id; call for_catalog first".to_string(),
            )),
            (entity_type, _) => Ok(format!("{}/custom_fields", entity_type)),
        }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, &self.path()?, params).await
    }

    pub async fn get_one(&self, id: u64) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, &self.path()?, id, &[]).await
    }

    pub async fn add(&self, fields: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, &self.path()?, fields).await
    }

    pub async fn update(&self, fields: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, &self.path()?, fields).await
    }

    pub async fn delete(&self, id: u64) -> Result<Value, ApiError> {
        delete_one(&self.dispatcher, &self.path()?, id).await
    }
}

/// Field groups (card tabs). The entity type may be supplied later through
/// [`CustomFieldGroups::set_entity_type`], but must be set before a call.
pub struct CustomFieldGroups {
    dispatcher: RequestDispatcher,
    entity_type: Option<EntityType>,
}

impl CustomFieldGroups {
    pub fn new(dispatcher: RequestDispatcher, entity_type: Option<&str>) -> Result<Self, ApiError> {
        let entity_type = entity_type
            .map(|value| EntityType::parse_scoped(value, CUSTOM_FIELD_GROUP_ENTITY_TYPES))
            .transpose()?;
        Ok(Self {
            dispatcher,
            entity_type,
        })
    }

    pub fn set_entity_type(&mut self, entity_type: &str) -> Result<&mut Self, ApiError> {
        self.entity_type = Some(EntityType::parse_scoped(
            entity_type,
            CUSTOM_FIELD_GROUP_ENTITY_TYPES,
        )?);
        Ok(self)
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        self.entity_type
    }

    fn path(&self) -> Result<String, ApiError> {
        self.entity_type
            .map(|entity_type| format!("{}/custom_fields/groups", entity_type))
            .ok_or_else(|| {
                ApiError::MissingConfiguration(
                    "custom field groups need an entity type".to_string(),
                )
            })
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, &self.path()?, params).await
    }

    /// Group ids are strings such as `leads_16651599325341`.
    pub async fn get_one(&self, id: &str) -> Result<Value, ApiError> {
        let path = self.path()?;
        let segment = id_segment(id)?;
        self.dispatcher
            .get(&format!("{}/{}", path, segment), &[])
            .await
            .with_context(|| format!("{}: get {}", path, id))
    }

    pub async fn add(&self, groups: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, &self.path()?, groups).await
    }

    pub async fn update(&self, groups: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, &self.path()?, groups).await
    }

    pub async fn delete(&self, id: &str) -> Result<Value, ApiError> {
        let path = self.path()?;
        let segment = id_segment(id)?;
        self.dispatcher
            .delete(&format!("{}/{}", path, segment))
            .await
            .with_context(|| format!("{}: delete {}", path, id))
    }
}

// ============ Tags ============

pub struct EntityTags {
    dispatcher: RequestDispatcher,
    entity_type: EntityType,
}

impl EntityTags {
    pub fn new(dispatcher: RequestDispatcher, entity_type: &str) -> Result<Self, ApiError> {
        Ok(Self {
            dispatcher,
            entity_type: EntityType::parse_scoped(entity_type, TAG_ENTITY_TYPES)?,
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn path(&self) -> String {
        format!("{}/tags", self.entity_type)
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, &self.path(), params).await
    }

    pub async fn add(&self, tags: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, &self.path(), tags).await
    }
}

// ============ Account / Roles / Segments ============

pub struct Account {
    dispatcher: RequestDispatcher,
}

impl Account {
    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Account details; `with` requests extra blocks such as `amojo_id` or `users_groups`.
    pub async fn get(&self, with: &[&str]) -> Result<Value, ApiError> {
        self.dispatcher
            .get("account", &with_query(with))
            .await
            .context("account: get")
    }
}

pub struct Roles {
    dispatcher: RequestDispatcher,
}

impl Roles {
    const PATH: &'static str = "roles";

    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, Self::PATH, params).await
    }

    pub async fn get_one(&self, id: u64, with: &[&str]) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, Self::PATH, id, with).await
    }

    pub async fn add(&self, roles: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, Self::PATH, roles).await
    }

    pub async fn update(&self, roles: &Value) -> Result<Value, ApiError> {
        update(&self.dispatcher, Self::PATH, roles).await
    }

    pub async fn delete(&self, id: u64) -> Result<Value, ApiError> {
        delete_one(&self.dispatcher, Self::PATH, id).await
    }
}

/// Customer segments.
pub struct Segments {
    dispatcher: RequestDispatcher,
}

impl Segments {
    const PATH: &'static str = "customers/segments";

    pub fn new(dispatcher: RequestDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get(&self, params: &ListParams) -> Result<Value, ApiError> {
        list(&self.dispatcher, Self::PATH, params).await
    }

    pub async fn get_one(&self, id: u64) -> Result<Value, ApiError> {
        get_one(&self.dispatcher, Self::PATH, id, &[]).await
    }

    pub async fn add(&self, segments: &Value) -> Result<Value, ApiError> {
        add(&self.dispatcher, Self::PATH, segments).await
    }

    pub async fn update_one(&self, id: u64, segment: &Value) -> Result<Value, ApiError> {
        update_one(&self.dispatcher, Self::PATH, id, segment).await
    }

    pub async fn delete(&self, id: u64) -> Result<Value, ApiError> {
        delete_one(&self.dispatcher, Self::PATH, id).await
    }
}

impl EntityService for Leads {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for Contacts {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for Companies {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for Catalogs {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for CatalogElements {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for CustomFields {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for CustomFieldGroups {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for EntityTags {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for Account {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for Roles {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}

impl EntityService for Segments {
    fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }
    fn dispatcher_mut(&mut self) -> &mut RequestDispatcher {
        &mut self.dispatcher
    }
}
