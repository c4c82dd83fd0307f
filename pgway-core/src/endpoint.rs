//! HTTP-side description of how a routine is exposed.

use std::collections::BTreeMap;
use std::time::Duration;

use http::Method;

use crate::model::{crud_type, CrudType, Routine};
use crate::naming;
use crate::retry::{ErrorCodePolicy, RetryStrategy};
use crate::validation::ParamValidation;

/// Primary parameter source for a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestParamType {
    QueryString,
    BodyJson,
}

/// How a NULL scalar result is written in text responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextResponseNullHandling {
    #[default]
    EmptyString,
    NullLiteral,
    NoContent,
}

/// How an empty query-string value binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueryStringNullHandling {
    #[default]
    EmptyString,
    NullLiteral,
    Ignore,
}

/// How request headers are surfaced to the routine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RequestHeadersMode {
    #[default]
    Ignore,
    /// Written into the session via `set_config` before the main statement.
    Context,
    /// Bound to a parameter with the configured name.
    Parameter,
}

/// Which subscribers receive an endpoint's NOTICE events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EventScope {
    /// Every subscriber on the endpoint's event path.
    #[default]
    All,
    /// Only authenticated subscribers.
    Authenticated,
    /// Only subscribers holding one of the endpoint's event roles.
    Authorized,
}

/// Minimum NOTICE severity forwarded to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum NoticeSeverity {
    Debug,
    Log,
    #[default]
    Info,
    Notice,
    Warning,
}

impl NoticeSeverity {
    pub fn parse(tag: &str) -> NoticeSeverity {
        match tag.to_ascii_uppercase().as_str() {
            "DEBUG" => NoticeSeverity::Debug,
            "LOG" => NoticeSeverity::Log,
            "NOTICE" => NoticeSeverity::Notice,
            "WARNING" => NoticeSeverity::Warning,
            _ => NoticeSeverity::Info,
        }
    }
}

/// Names of the proxy-response parameters a routine may declare. When any
/// parameter matches one of these, the proxy response is mapped into the
/// routine instead of being returned verbatim.
pub mod proxy_params {
    pub const STATUS_CODE: &str = "_response_status_code";
    pub const BODY: &str = "_response_body";
    pub const HEADERS: &str = "_response_headers";
    pub const CONTENT_TYPE: &str = "_response_content_type";
    pub const SUCCESS: &str = "_response_success";
    pub const ERROR_MESSAGE: &str = "_response_error_message";

    pub const ALL: &[&str] = &[STATUS_CODE, BODY, HEADERS, CONTENT_TYPE, SUCCESS, ERROR_MESSAGE];

    pub fn is_proxy_param(actual_name: &str) -> bool {
        ALL.contains(&actual_name)
    }
}

/// Mutable endpoint descriptor, built by the metadata builder (factory
/// defaults + comment annotations + user handlers) and frozen into the
/// endpoint table.
#[derive(Clone, Debug)]
pub struct RoutineEndpoint {
    pub path: String,
    pub method: Method,
    pub request_param_type: RequestParamType,

    // Authorization.
    pub requires_authorization: bool,
    pub authorize_roles: Vec<String>,
    pub login: bool,
    pub logout: bool,
    /// Responses get `Cache-Control: no-store` and values are excluded from
    /// logs.
    pub security_sensitive: bool,

    // Response shaping.
    pub response_content_type: Option<String>,
    pub response_headers: Vec<(String, String)>,
    pub text_response_null_handling: TextResponseNullHandling,
    pub query_string_null_handling: QueryStringNullHandling,
    pub buffer_rows: usize,
    pub raw: bool,
    pub raw_value_separator: Option<String>,
    pub raw_new_line_separator: Option<String>,
    pub raw_column_names: bool,

    // Cache.
    pub cached: bool,
    pub cached_params: Vec<String>,
    pub cache_expires_in: Option<Duration>,
    pub invalidate_cache: bool,

    // Connection.
    pub connection_name: Option<String>,
    pub command_timeout: Option<Duration>,
    pub retry_strategy: Option<RetryStrategy>,
    pub error_code_policy: ErrorCodePolicy,

    // Uploads.
    pub upload: bool,
    pub upload_handlers: Vec<String>,

    // User context.
    pub user_context: bool,
    pub use_user_parameters: bool,
    pub request_headers_mode: RequestHeadersMode,
    pub request_headers_parameter_name: String,

    // NOTICE streaming.
    pub info_events: bool,
    pub info_scope: EventScope,
    pub info_roles: Vec<String>,
    pub info_severity: NoticeSeverity,

    // Proxy.
    pub is_proxy: bool,
    pub proxy_host: Option<String>,

    // Binding.
    /// Names appearing as `{name}` placeholders in `path`, in order.
    pub path_parameters: Vec<String>,
    /// Converted parameter name → rule chain.
    pub parameter_validations: BTreeMap<String, Vec<ParamValidation>>,
    /// Converted name of the parameter receiving the whole request body.
    pub body_parameter_name: Option<String>,
    /// Free-form key/value pairs from unrecognized-but-declared annotation
    /// keys, available to endpoint-create handlers.
    pub custom_parameters: BTreeMap<String, String>,

    pub disabled: bool,
    pub tags: Vec<String>,
}

impl RoutineEndpoint {
    /// Factory defaults for a discovered routine.
    ///
    /// The HTTP method follows the routine's CRUD classification
    /// (`Select` → GET, `Delete` → DELETE, `Update` → PUT, otherwise POST);
    /// the path is `{prefix}/{kebab-case name}`; GET and DELETE bind from
    /// the query string, everything else from a JSON body.
    pub fn for_routine(routine: &Routine, path_prefix: &str) -> RoutineEndpoint {
        let method = match crud_type(&routine.name, routine.volatility) {
            CrudType::Select => Method::GET,
            CrudType::Delete => Method::DELETE,
            CrudType::Update => Method::PUT,
            CrudType::Insert => Method::POST,
        };
        let request_param_type = if method == Method::GET || method == Method::DELETE {
            RequestParamType::QueryString
        } else {
            RequestParamType::BodyJson
        };
        let prefix = path_prefix.trim_end_matches('/');
        let path = format!("{}/{}", prefix, naming::to_kebab_case(&routine.name));
        RoutineEndpoint {
            path,
            method,
            request_param_type,
            requires_authorization: false,
            authorize_roles: Vec::new(),
            login: false,
            logout: false,
            security_sensitive: false,
            response_content_type: None,
            response_headers: Vec::new(),
            text_response_null_handling: TextResponseNullHandling::default(),
            query_string_null_handling: QueryStringNullHandling::default(),
            buffer_rows: 25,
            raw: false,
            raw_value_separator: None,
            raw_new_line_separator: None,
            raw_column_names: false,
            cached: false,
            cached_params: Vec::new(),
            cache_expires_in: None,
            invalidate_cache: false,
            connection_name: None,
            command_timeout: None,
            retry_strategy: None,
            error_code_policy: ErrorCodePolicy::new(),
            upload: false,
            upload_handlers: Vec::new(),
            user_context: false,
            use_user_parameters: false,
            request_headers_mode: RequestHeadersMode::default(),
            request_headers_parameter_name: "_headers".to_string(),
            info_events: false,
            info_scope: EventScope::default(),
            info_roles: Vec::new(),
            info_severity: NoticeSeverity::default(),
            is_proxy: false,
            proxy_host: None,
            path_parameters: Vec::new(),
            parameter_validations: BTreeMap::new(),
            body_parameter_name: None,
            custom_parameters: BTreeMap::new(),
            disabled: false,
            tags: Vec::new(),
        }
    }

    /// Re-derive `path_parameters` from `{name}` placeholders in the path.
    /// Called whenever an annotation rewrites the path.
    pub fn refresh_path_parameters(&mut self) {
        self.path_parameters.clear();
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            self.path_parameters
                .push(rest[open + 1..open + close].to_string());
            rest = &rest[open + close + 1..];
        }
    }

    /// A passthrough proxy forwards the upstream response verbatim and
    /// never calls the database.
    pub fn is_passthrough_proxy(&self, routine: &Routine) -> bool {
        self.is_proxy
            && !routine
                .parameters
                .iter()
                .any(|p| proxy_params::is_proxy_param(&p.actual_name))
    }

    /// Endpoint table key.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Parameter, RoutineType, Volatility};
    use crate::types::TypeDescriptor;

    pub(crate) fn routine(name: &str, volatility: Volatility) -> Routine {
        Routine {
            routine_type: RoutineType::Function,
            schema: "public".to_string(),
            name: name.to_string(),
            comment: None,
            is_strict: false,
            volatility,
            returns_set: false,
            is_void: false,
            returns_unnamed_set: false,
            returns_record_type: false,
            column_count: 1,
            original_column_names: vec![name.to_string()],
            converted_column_names: vec![name.to_string()],
            column_types: vec![TypeDescriptor::new("integer", false)],
            parameters: Vec::new(),
            has_variadic: false,
            expression: String::new(),
            full_definition: String::new(),
            simple_definition: String::new(),
            composite_columns: Default::default(),
            composite_array_columns: Default::default(),
        }
    }

    #[test]
    fn factory_method_defaults() {
        let e = RoutineEndpoint::for_routine(&routine("get_x", Volatility::Volatile), "/api");
        assert_eq!(e.method, Method::GET);
        assert_eq!(e.path, "/api/get-x");
        assert_eq!(e.request_param_type, RequestParamType::QueryString);

        let e = RoutineEndpoint::for_routine(&routine("delete_x", Volatility::Volatile), "/api");
        assert_eq!(e.method, Method::DELETE);
        assert_eq!(e.request_param_type, RequestParamType::QueryString);

        let e = RoutineEndpoint::for_routine(&routine("update_x", Volatility::Volatile), "/api");
        assert_eq!(e.method, Method::PUT);
        assert_eq!(e.request_param_type, RequestParamType::BodyJson);

        let e = RoutineEndpoint::for_routine(&routine("do_work", Volatility::Volatile), "/api");
        assert_eq!(e.method, Method::POST);
    }

    #[test]
    fn stable_routine_maps_to_get() {
        let e = RoutineEndpoint::for_routine(&routine("compute_x", Volatility::Stable), "/api");
        assert_eq!(e.method, Method::GET);
    }

    #[test]
    fn path_parameters_refresh() {
        let mut e = RoutineEndpoint::for_routine(&routine("get_x", Volatility::Stable), "/api");
        e.path = "/api/users/{id}/posts/{post_id}".to_string();
        e.refresh_path_parameters();
        assert_eq!(e.path_parameters, vec!["id", "post_id"]);
    }

    #[test]
    fn passthrough_proxy_detection() {
        let mut r = routine("get_x", Volatility::Stable);
        let mut e = RoutineEndpoint::for_routine(&r, "/api");
        e.is_proxy = true;
        assert!(e.is_passthrough_proxy(&r));

        r.parameters.push(Parameter::new(
            0,
            proxy_params::BODY,
            TypeDescriptor::new("text", false),
        ));
        assert!(!e.is_passthrough_proxy(&r));
    }
}
