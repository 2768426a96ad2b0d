//! Mapping between the desired client fields and the Keycloak payload.
//!
//! Every field is carried by presence. Lists and maps replace the remote
//! value wholesale, so an update always converges on the resource. The only
//! exception is `protocolMappers`: an empty list is treated as unset and
//! leaves the mappers Keycloak already has alone.

use representations::{ClientRepresentation, ProtocolMapperRepresentation};

use super::client::{ClientFields, ProtocolMapper};

impl From<&ClientFields> for ClientRepresentation {
    fn from(fields: &ClientFields) -> Self {
        Self {
            id: fields.id.clone(),
            client_id: fields.client_id.clone(),
            name: fields.name.clone(),
            description: fields.description.clone(),
            type_: fields.type_.clone(),
            root_url: fields.root_url.clone(),
            admin_url: fields.admin_url.clone(),
            base_url: fields.base_url.clone(),
            surrogate_auth_required: fields.surrogate_auth_required,
            enabled: fields.enabled,
            always_display_in_console: fields.always_display_in_console,
            client_authenticator_type: fields.client_authenticator_type.clone(),
            secret: fields.secret.clone(),
            registration_access_token: fields.registration_access_token.clone(),
            default_roles: fields.default_roles.clone(),
            redirect_uris: fields.redirect_uris.clone(),
            web_origins: fields.web_origins.clone(),
            not_before: fields.not_before,
            bearer_only: fields.bearer_only,
            consent_required: fields.consent_required,
            standard_flow_enabled: fields.standard_flow_enabled,
            implicit_flow_enabled: fields.implicit_flow_enabled,
            direct_access_grants_enabled: fields.direct_access_grants_enabled,
            service_accounts_enabled: fields.service_accounts_enabled,
            authorization_services_enabled: fields.authorization_services_enabled,
            direct_grants_only: fields.direct_grants_only,
            public_client: fields.public_client,
            frontchannel_logout: fields.frontchannel_logout,
            protocol: fields.protocol.clone(),
            attributes: fields.attributes.clone(),
            authentication_flow_binding_overrides: fields
                .authentication_flow_binding_overrides
                .clone(),
            full_scope_allowed: fields.full_scope_allowed,
            node_re_registration_timeout: fields.node_re_registration_timeout,
            registered_nodes: fields.registered_nodes.as_ref().map(|nodes| {
                nodes
                    .iter()
                    .map(|(node, registered)| (node.clone(), i64::from(*registered)))
                    .collect()
            }),
            protocol_mappers: fields
                .protocol_mappers
                .as_ref()
                .filter(|mappers| !mappers.is_empty())
                .map(|mappers| mappers.iter().map(Into::into).collect()),
            client_template: fields.client_template.clone(),
            use_template_config: fields.use_template_config,
            use_template_scope: fields.use_template_scope,
            use_template_mappers: fields.use_template_mappers,
            default_client_scopes: fields.default_client_scopes.clone(),
            optional_client_scopes: fields.optional_client_scopes.clone(),
            authorization_settings: fields.authorization_settings.clone(),
            access: fields.access.as_ref().map(|access| {
                access
                    .iter()
                    .map(|(key, allowed)| (key.clone(), serde_json::Value::Bool(*allowed)))
                    .collect()
            }),
            origin: fields.origin.clone(),
        }
    }
}

impl From<&ProtocolMapper> for ProtocolMapperRepresentation {
    fn from(mapper: &ProtocolMapper) -> Self {
        Self {
            id: mapper.id.clone(),
            name: mapper.name.clone(),
            protocol: mapper.protocol.clone(),
            protocol_mapper: mapper.protocol_mapper.clone(),
            config: mapper.config.clone(),
        }
    }
}

// Values that do not fit the resource types are clamped (node registration
// times) or dropped (non-boolean access entries).
impl From<ClientRepresentation> for ClientFields {
    fn from(client: ClientRepresentation) -> Self {
        Self {
            id: client.id,
            client_id: client.client_id,
            name: client.name,
            description: client.description,
            type_: client.type_,
            root_url: client.root_url,
            admin_url: client.admin_url,
            base_url: client.base_url,
            surrogate_auth_required: client.surrogate_auth_required,
            enabled: client.enabled,
            always_display_in_console: client.always_display_in_console,
            client_authenticator_type: client.client_authenticator_type,
            secret: client.secret,
            registration_access_token: client.registration_access_token,
            default_roles: client.default_roles,
            redirect_uris: client.redirect_uris,
            web_origins: client.web_origins,
            not_before: client.not_before,
            bearer_only: client.bearer_only,
            consent_required: client.consent_required,
            standard_flow_enabled: client.standard_flow_enabled,
            implicit_flow_enabled: client.implicit_flow_enabled,
            direct_access_grants_enabled: client.direct_access_grants_enabled,
            service_accounts_enabled: client.service_accounts_enabled,
            authorization_services_enabled: client.authorization_services_enabled,
            direct_grants_only: client.direct_grants_only,
            public_client: client.public_client,
            frontchannel_logout: client.frontchannel_logout,
            protocol: client.protocol,
            attributes: client.attributes,
            authentication_flow_binding_overrides: client.authentication_flow_binding_overrides,
            full_scope_allowed: client.full_scope_allowed,
            node_re_registration_timeout: client.node_re_registration_timeout,
            registered_nodes: client.registered_nodes.map(|nodes| {
                nodes
                    .into_iter()
                    .map(|(node, registered)| {
                        let registered = registered.clamp(0, i64::from(u32::MAX)) as u32;
                        (node, registered)
                    })
                    .collect()
            }),
            protocol_mappers: client
                .protocol_mappers
                .map(|mappers| mappers.into_iter().map(Into::into).collect()),
            client_template: client.client_template,
            use_template_config: client.use_template_config,
            use_template_scope: client.use_template_scope,
            use_template_mappers: client.use_template_mappers,
            default_client_scopes: client.default_client_scopes,
            optional_client_scopes: client.optional_client_scopes,
            authorization_settings: client.authorization_settings,
            access: client.access.map(|access| {
                access
                    .into_iter()
                    .filter_map(|(key, value)| value.as_bool().map(|allowed| (key, allowed)))
                    .collect()
            }),
            origin: client.origin,
        }
    }
}

impl From<ProtocolMapperRepresentation> for ProtocolMapper {
    fn from(mapper: ProtocolMapperRepresentation) -> Self {
        Self {
            id: mapper.id,
            name: mapper.name,
            protocol: mapper.protocol,
            protocol_mapper: mapper.protocol_mapper,
            config: mapper.config,
        }
    }
}
