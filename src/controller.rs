//! Generic REST controller over one [`Model`]: the named handlers and the router that mounts them.
//!
//! ```text
//! GET    /                       paginate + list
//! POST   /search                 paginate + list
//! GET    /scope/:scope           scope
//! POST   /scope/:scope           scope
//! PUT    /:id/method/:method     instance_method
//! POST   /                       create
//! GET    /:id                    select
//! PUT    /:id                    update
//! PATCH  /:id                    patch
//! DELETE /:id                    destroy
//! GET    /:id/:relation          relation_get: as relation_list (to-many) or relation_parent (to-one)
//! POST   /:id/:relation/search   relation_list
//! POST   /:id/:relation          relation_create
//! GET    /:id/:relation/:rel_id  relation_select
//! PUT    /:id/:relation/:rel_id  relation_link
//! DELETE /:id/:relation/:rel_id  relation_unlink
//! ```

use crate::config::{RelationKind, ResolvedRelation};
use crate::error::AppError;
use crate::model::{body_to_row, field, parse_id, FindOptions, Model, Row};
use crate::pagination::{paginate, Pagination};
use crate::query::{ListParams, Where};
use crate::service::RequestValidator;
use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    handler::Handler,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

const DESTROY_REFERENCED: &str = "Cannot delete item as it is referenced by another object. \
Delete or amend any objects that reference this item then try again";

/// Server-side behaviour invoked by `PUT /:id/method/:method`. Receives the loaded instance and
/// the request body; its result is the response body.
#[async_trait]
pub trait InstanceMethod: Send + Sync {
    async fn call(&self, model: Arc<dyn Model>, instance: Value, args: Value) -> Result<Value, AppError>;
}

#[async_trait]
impl<F, Fut> InstanceMethod for F
where
    F: Fn(Arc<dyn Model>, Value, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
{
    async fn call(&self, model: Arc<dyn Model>, instance: Value, args: Value) -> Result<Value, AppError> {
        self(model, instance, args).await
    }
}

/// Handlers for one model. Cheap to clone; used as the router state.
#[derive(Clone)]
pub struct Controller {
    model: Arc<dyn Model>,
    methods: Arc<HashMap<String, Arc<dyn InstanceMethod>>>,
}

/// Build the controller for `model`.
pub fn controller(model: Arc<dyn Model>) -> Controller {
    Controller {
        model,
        methods: Arc::new(HashMap::new()),
    }
}

impl Controller {
    /// Register an instance method. It is only reachable when the model also lists it in
    /// `public_instance_methods`.
    pub fn with_method(mut self, name: impl Into<String>, method: impl InstanceMethod + 'static) -> Self {
        Arc::make_mut(&mut self.methods).insert(name.into(), Arc::new(method));
        self
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    /// Where the host mounts these routes.
    pub fn path_segment(&self) -> &str {
        &self.model.entity().path_segment
    }

    pub fn routes(&self) -> Router {
        let paged = || middleware::from_fn_with_state(self.clone(), paginate);
        Router::new()
            .route("/", get(list.layer(paged())).post(create))
            .route("/search", post(list.layer(paged())))
            .route("/scope/:scope", get(scope).post(scope))
            .route("/:id", get(select).put(update).patch(patch).delete(destroy))
            .route("/:id/method/:method", put(instance_method))
            .route("/:id/:relation", get(relation_get).post(relation_create))
            .route("/:id/:relation/search", post(relation_list))
            .route(
                "/:id/:relation/:rel_id",
                get(relation_select).put(relation_link).delete(relation_unlink),
            )
            .with_state(self.clone())
    }

    /// Load an instance or answer 404.
    async fn load(&self, id: &str) -> Result<Value, AppError> {
        self.model
            .find_by_id(id)
            .await?
            .ok_or_else(|| instance_not_found(self.model.name()))
    }

    fn relation(&self, name: &str) -> Result<&ResolvedRelation, AppError> {
        self.model
            .relation(name)
            .ok_or_else(|| AppError::NotFound(format!("Relation '{}' Not Found On '{}'", name, self.model.name())))
    }

    async fn list_related(
        &self,
        id: &str,
        relation: &str,
        pairs: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Vec<Value>, AppError> {
        let instance = self.load(id).await?;
        let relation = self.relation(relation)?;
        let opts = ListParams::from_pairs(pairs).find_options(body)?;
        self.model.get_related(&instance, relation, &opts).await
    }
}

fn instance_not_found(name: &str) -> AppError {
    AppError::NotFound(format!("Instance of '{}' Not Found", name))
}

type Pairs = Query<Vec<(String, String)>>;

/// Query-string options, overridden by the window `paginate` computed when it ran.
pub async fn list(
    State(ctrl): State<Controller>,
    Query(pairs): Pairs,
    page: Option<Extension<Pagination>>,
    body: Option<Json<Value>>,
) -> Result<Json<Vec<Value>>, AppError> {
    let mut opts = ListParams::from_pairs(&pairs).find_options(body.as_ref().map(|b| &b.0))?;
    if let Some(Extension(p)) = page {
        opts.limit = Some(p.limit);
        opts.offset = Some(p.offset);
        opts.order = Some(p.order);
    }
    Ok(Json(ctrl.model.find_all(&opts).await?))
}

pub async fn scope(
    State(ctrl): State<Controller>,
    Path(name): Path<String>,
    Query(pairs): Pairs,
    body: Option<Json<Value>>,
) -> Result<Json<Vec<Value>>, AppError> {
    let model = &ctrl.model;
    let scope = model
        .scope(&name)
        .ok_or_else(|| AppError::NotFound(format!("Scope '{}' Not Found On '{}'", name, model.name())))?;
    let opts = ListParams::from_pairs(&pairs)
        .find_options(body.as_ref().map(|b| &b.0))?
        .with_scope(scope);
    Ok(Json(model.find_all(&opts).await?))
}

pub async fn instance_method(
    State(ctrl): State<Controller>,
    Path((id, method)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let handler = ctrl
        .methods
        .get(&method)
        .filter(|_| ctrl.model.is_public_method(&method))
        .ok_or_else(|| AppError::NotFound(format!("Method '{}' Not Found On '{}'", method, ctrl.model.name())))?;
    let args = body.map(|Json(v)| v).unwrap_or(Value::Null);
    tracing::debug!(model = %ctrl.model.name(), %id, %method, "instance method");
    Ok(Json(handler.call(ctrl.model.clone(), instance, args).await?))
}

pub async fn create(
    State(ctrl): State<Controller>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let row = body_to_row(body)?;
    RequestValidator::validate(&row, ctrl.model.validation_rules())?;
    let created = ctrl.model.create(row).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn select(State(ctrl): State<Controller>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    Ok(Json(ctrl.load(&id).await?))
}

pub async fn update(
    State(ctrl): State<Controller>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let row = body_to_row(body)?;
    RequestValidator::validate_partial(&row, ctrl.model.validation_rules())?;
    Ok(Json(ctrl.model.update(&instance, row).await?))
}

/// Like `update`, but objects sent for JSON/JSONB columns are merged into the stored value
/// one level deep instead of replacing it.
pub async fn patch(
    State(ctrl): State<Controller>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let mut row = body_to_row(body)?;
    merge_json_columns(&mut row, &instance, &ctrl.model.json_columns());
    RequestValidator::validate_partial(&row, ctrl.model.validation_rules())?;
    Ok(Json(ctrl.model.update(&instance, row).await?))
}

fn merge_json_columns(row: &mut Row, instance: &Value, columns: &[String]) {
    for col in columns {
        let Some(Value::Object(incoming)) = row.get(col) else { continue };
        if let Value::Object(mut current) = field(instance, col) {
            current.extend(incoming.clone());
            row.insert(col.clone(), Value::Object(current));
        }
    }
}

/// 202 whether or not a row was removed.
pub async fn destroy(State(ctrl): State<Controller>, Path(id): Path<String>) -> Result<StatusCode, AppError> {
    match ctrl.model.destroy(&id).await {
        Ok(n) => {
            tracing::debug!(model = %ctrl.model.name(), %id, removed = n, "destroy");
            Ok(StatusCode::ACCEPTED)
        }
        Err(AppError::ForeignKey(detail)) => {
            tracing::debug!(model = %ctrl.model.name(), %id, %detail, "destroy blocked by reference");
            Err(AppError::BadRequest(DESTROY_REFERENCED.into()))
        }
        Err(e) => Err(e),
    }
}

/// `GET /:id/:relation`: a list for to-many relations, a single object (or null) for to-one.
pub async fn relation_get(
    State(ctrl): State<Controller>,
    Path((id, relation)): Path<(String, String)>,
    Query(pairs): Pairs,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let relation = ctrl.relation(&relation)?;
    if relation.kind.is_to_many() {
        let opts = ListParams::from_pairs(&pairs).find_options(None)?;
        let rows = ctrl.model.get_related(&instance, relation, &opts).await?;
        Ok(Json(Value::Array(rows)))
    } else {
        let parent = ctrl.model.get_one_related(&instance, relation).await?;
        Ok(Json(parent.unwrap_or(Value::Null)))
    }
}

pub async fn relation_list(
    State(ctrl): State<Controller>,
    Path((id, relation)): Path<(String, String)>,
    Query(pairs): Pairs,
    body: Option<Json<Value>>,
) -> Result<Json<Vec<Value>>, AppError> {
    let rows = ctrl
        .list_related(&id, &relation, &pairs, body.as_ref().map(|b| &b.0))
        .await?;
    Ok(Json(rows))
}

pub async fn relation_parent(
    State(ctrl): State<Controller>,
    Path((id, relation)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let relation = ctrl.relation(&relation)?;
    let parent = ctrl.model.get_one_related(&instance, relation).await?;
    Ok(Json(parent.unwrap_or(Value::Null)))
}

pub async fn relation_create(
    State(ctrl): State<Controller>,
    Path((id, relation)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let instance = ctrl.load(&id).await?;
    let relation = ctrl.relation(&relation)?;
    let row = body_to_row(body)?;
    // to-many and has_one rows receive the owner's key from the store
    let mut checked = row.clone();
    if matches!(relation.kind, RelationKind::HasMany | RelationKind::HasOne) {
        checked.insert(relation.foreign_key.clone(), field(&instance, ctrl.model.primary_key()));
    }
    RequestValidator::validate(&checked, &relation.validation)?;
    let created = ctrl.model.create_related(&instance, relation, row).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn relation_select(
    State(ctrl): State<Controller>,
    Path((id, relation, rel_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let relation = ctrl.relation(&relation)?;
    let target = &relation.target;
    let opts = FindOptions::filter(Where::eq(target.pk_column.clone(), parse_id(&rel_id, &target.pk_type)?));
    ctrl.model
        .get_related(&instance, relation, &opts)
        .await?
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| instance_not_found(&target.model_name))
}

pub async fn relation_link(
    State(ctrl): State<Controller>,
    Path((id, relation, rel_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    let instance = ctrl.load(&id).await?;
    let relation = ctrl.relation(&relation)?;
    let target = &relation.target.model_name;
    match ctrl.model.add_related(&instance, relation, &rel_id).await {
        Ok(Some(link)) => Ok(Json(link)),
        Ok(None) => Err(AppError::BadRequest(format!(
            "Relation of '{}' and '{}' Already Exists",
            target,
            ctrl.model.name()
        ))),
        Err(AppError::ForeignKey(_)) => Err(instance_not_found(target)),
        Err(e) => Err(e),
    }
}

pub async fn relation_unlink(
    State(ctrl): State<Controller>,
    Path((id, relation, rel_id)): Path<(String, String, String)>,
) -> Result<Json<u64>, AppError> {
    let instance = ctrl.load(&id).await?;
    let relation = ctrl.relation(&relation)?;
    Ok(Json(ctrl.model.remove_related(&instance, relation, &rel_id).await?))
}
