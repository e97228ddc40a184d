//! The closed set of OpenAPI 3.0 roles a node can play, plus the traversal
//! table that drives lenient decoding: for each role, which fields carry
//! which child roles. The table never rejects anything; unknown fields are
//! simply not descended into.

use std::fmt::{self, Display};

/// An OpenAPI role.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Nominal {
    Reference,
    Schema,
    Response,
    Parameter,
    RequestBody,
    MediaType,
    Content,
    Header,
    Link,
    Example,
    Encoding,
    Operation,
    PathItem,
    Paths,
    Callback,
    Callbacks,
    Components,
    Server,
    ServerVariable,
    ServerVariables,
    OAuthFlow,
    OAuthFlows,
    SecurityScheme,
    SecuritySchemes,
    Examples,
    Headers,
    Links,
    Schemas,
    ComponentResponses,
    ComponentParameters,
    RequestBodies,
    Responses,
    Parameters,
    Tag,
    TagArray,
    Contact,
    License,
    Info,
    ExternalDocumentation,
    Xml,
    Discriminator,
    SecurityRequirement,
    Document,
}

/// How a field relates its value to a child role.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FieldRole {
    /// The value plays the role directly.
    One(Nominal),
    /// The value is a sequence whose items play the role.
    Each(Nominal),
    /// The value is a mapping whose values play the role.
    Map(Nominal),
}

impl Nominal {
    pub fn as_str(self) -> &'static str {
        match self {
            Nominal::Reference => "Reference",
            Nominal::Schema => "Schema",
            Nominal::Response => "Response",
            Nominal::Parameter => "Parameter",
            Nominal::RequestBody => "RequestBody",
            Nominal::MediaType => "MediaType",
            Nominal::Content => "Content",
            Nominal::Header => "Header",
            Nominal::Link => "Link",
            Nominal::Example => "Example",
            Nominal::Encoding => "Encoding",
            Nominal::Operation => "Operation",
            Nominal::PathItem => "PathItem",
            Nominal::Paths => "Paths",
            Nominal::Callback => "Callback",
            Nominal::Callbacks => "Callbacks",
            Nominal::Components => "Components",
            Nominal::Server => "Server",
            Nominal::ServerVariable => "ServerVariable",
            Nominal::ServerVariables => "ServerVariables",
            Nominal::OAuthFlow => "OAuthFlow",
            Nominal::OAuthFlows => "OAuthFlows",
            Nominal::SecurityScheme => "SecurityScheme",
            Nominal::SecuritySchemes => "SecuritySchemes",
            Nominal::Examples => "Examples",
            Nominal::Headers => "Headers",
            Nominal::Links => "Links",
            Nominal::Schemas => "Schemas",
            Nominal::ComponentResponses => "ComponentResponses",
            Nominal::ComponentParameters => "ComponentParameters",
            Nominal::RequestBodies => "RequestBodies",
            Nominal::Responses => "Responses",
            Nominal::Parameters => "Parameters",
            Nominal::Tag => "Tag",
            Nominal::TagArray => "TagArray",
            Nominal::Contact => "Contact",
            Nominal::License => "License",
            Nominal::Info => "Info",
            Nominal::ExternalDocumentation => "ExternalDocumentation",
            Nominal::Xml => "XML",
            Nominal::Discriminator => "Discriminator",
            Nominal::SecurityRequirement => "SecurityRequirement",
            Nominal::Document => "Document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Reference" => Nominal::Reference,
            "Schema" => Nominal::Schema,
            "Response" => Nominal::Response,
            "Parameter" => Nominal::Parameter,
            "RequestBody" => Nominal::RequestBody,
            "MediaType" => Nominal::MediaType,
            "Content" => Nominal::Content,
            "Header" => Nominal::Header,
            "Link" => Nominal::Link,
            "Example" => Nominal::Example,
            "Encoding" => Nominal::Encoding,
            "Operation" => Nominal::Operation,
            "PathItem" => Nominal::PathItem,
            "Paths" => Nominal::Paths,
            "Callback" => Nominal::Callback,
            "Callbacks" => Nominal::Callbacks,
            "Components" => Nominal::Components,
            "Server" => Nominal::Server,
            "ServerVariable" => Nominal::ServerVariable,
            "ServerVariables" => Nominal::ServerVariables,
            "OAuthFlow" => Nominal::OAuthFlow,
            "OAuthFlows" => Nominal::OAuthFlows,
            "SecurityScheme" => Nominal::SecurityScheme,
            "SecuritySchemes" => Nominal::SecuritySchemes,
            "Examples" => Nominal::Examples,
            "Headers" => Nominal::Headers,
            "Links" => Nominal::Links,
            "Schemas" => Nominal::Schemas,
            "ComponentResponses" => Nominal::ComponentResponses,
            "ComponentParameters" => Nominal::ComponentParameters,
            "RequestBodies" => Nominal::RequestBodies,
            "Responses" => Nominal::Responses,
            "Parameters" => Nominal::Parameters,
            "Tag" => Nominal::Tag,
            "TagArray" => Nominal::TagArray,
            "Contact" => Nominal::Contact,
            "License" => Nominal::License,
            "Info" => Nominal::Info,
            "ExternalDocumentation" => Nominal::ExternalDocumentation,
            "XML" => Nominal::Xml,
            "Discriminator" => Nominal::Discriminator,
            "SecurityRequirement" => Nominal::SecurityRequirement,
            "Document" => Nominal::Document,
            _ => return None,
        })
    }

    /// The role every value of a wildcard mapping plays, for roles that
    /// are keyed collections (`paths`, `components.schemas`, …).
    pub(crate) fn entry_role(self) -> Option<Nominal> {
        Some(match self {
            Nominal::Paths => Nominal::PathItem,
            Nominal::Responses | Nominal::ComponentResponses => Nominal::Response,
            Nominal::Content => Nominal::MediaType,
            Nominal::Schemas => Nominal::Schema,
            Nominal::ComponentParameters => Nominal::Parameter,
            Nominal::RequestBodies => Nominal::RequestBody,
            Nominal::Headers => Nominal::Header,
            Nominal::Links => Nominal::Link,
            Nominal::Examples => Nominal::Example,
            Nominal::Callbacks => Nominal::Callback,
            Nominal::Callback => Nominal::PathItem,
            Nominal::SecuritySchemes => Nominal::SecurityScheme,
            Nominal::ServerVariables => Nominal::ServerVariable,
            _ => return None,
        })
    }

    /// The role every item of a wildcard sequence plays.
    pub(crate) fn item_role(self) -> Option<Nominal> {
        Some(match self {
            Nominal::Parameters => Nominal::Parameter,
            Nominal::TagArray => Nominal::Tag,
            _ => return None,
        })
    }

    /// The child role carried by a named field of this role.
    pub(crate) fn field_role(self, key: &str) -> Option<FieldRole> {
        use FieldRole::{Each, Map, One};
        Some(match (self, key) {
            (Nominal::Document, "info") => One(Nominal::Info),
            (Nominal::Document, "servers") => Each(Nominal::Server),
            (Nominal::Document, "paths") => One(Nominal::Paths),
            (Nominal::Document, "components") => One(Nominal::Components),
            (Nominal::Document, "security") => Each(Nominal::SecurityRequirement),
            (Nominal::Document, "tags") => One(Nominal::TagArray),
            (Nominal::Document, "externalDocs") => One(Nominal::ExternalDocumentation),

            (Nominal::Info, "contact") => One(Nominal::Contact),
            (Nominal::Info, "license") => One(Nominal::License),

            (
                Nominal::PathItem,
                "get" | "put" | "post" | "delete" | "options" | "head" | "patch" | "trace",
            ) => One(Nominal::Operation),
            (Nominal::PathItem, "parameters") => One(Nominal::Parameters),
            (Nominal::PathItem, "servers") => Each(Nominal::Server),

            (Nominal::Operation, "parameters") => One(Nominal::Parameters),
            (Nominal::Operation, "requestBody") => One(Nominal::RequestBody),
            (Nominal::Operation, "responses") => One(Nominal::Responses),
            (Nominal::Operation, "callbacks") => One(Nominal::Callbacks),
            (Nominal::Operation, "security") => Each(Nominal::SecurityRequirement),
            (Nominal::Operation, "servers") => Each(Nominal::Server),
            (Nominal::Operation, "externalDocs") => One(Nominal::ExternalDocumentation),

            (Nominal::Parameter | Nominal::Header, "schema") => One(Nominal::Schema),
            (Nominal::Parameter | Nominal::Header, "content") => One(Nominal::Content),
            (Nominal::Parameter | Nominal::Header, "examples") => One(Nominal::Examples),

            (Nominal::RequestBody, "content") => One(Nominal::Content),

            (Nominal::Response, "headers") => One(Nominal::Headers),
            (Nominal::Response, "content") => One(Nominal::Content),
            (Nominal::Response, "links") => One(Nominal::Links),

            (Nominal::MediaType, "schema") => One(Nominal::Schema),
            (Nominal::MediaType, "examples") => One(Nominal::Examples),
            (Nominal::MediaType, "encoding") => Map(Nominal::Encoding),

            (Nominal::Encoding, "headers") => One(Nominal::Headers),

            (Nominal::Schema, "properties") => Map(Nominal::Schema),
            (Nominal::Schema, "items" | "additionalProperties" | "not") => One(Nominal::Schema),
            (Nominal::Schema, "allOf" | "oneOf" | "anyOf") => Each(Nominal::Schema),
            (Nominal::Schema, "discriminator") => One(Nominal::Discriminator),
            (Nominal::Schema, "xml") => One(Nominal::Xml),
            (Nominal::Schema, "externalDocs") => One(Nominal::ExternalDocumentation),

            (Nominal::Components, "schemas") => One(Nominal::Schemas),
            (Nominal::Components, "responses") => One(Nominal::ComponentResponses),
            (Nominal::Components, "parameters") => One(Nominal::ComponentParameters),
            (Nominal::Components, "requestBodies") => One(Nominal::RequestBodies),
            (Nominal::Components, "headers") => One(Nominal::Headers),
            (Nominal::Components, "examples") => One(Nominal::Examples),
            (Nominal::Components, "links") => One(Nominal::Links),
            (Nominal::Components, "callbacks") => One(Nominal::Callbacks),
            (Nominal::Components, "securitySchemes") => One(Nominal::SecuritySchemes),

            (Nominal::Server, "variables") => One(Nominal::ServerVariables),
            (Nominal::Link, "server") => One(Nominal::Server),
            (Nominal::SecurityScheme, "flows") => One(Nominal::OAuthFlows),
            (
                Nominal::OAuthFlows,
                "implicit" | "password" | "clientCredentials" | "authorizationCode",
            ) => One(Nominal::OAuthFlow),
            (Nominal::Tag, "externalDocs") => One(Nominal::ExternalDocumentation),

            _ => return None,
        })
    }
}

impl Display for Nominal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for nominal in [
            Nominal::Schema,
            Nominal::Xml,
            Nominal::ComponentResponses,
            Nominal::Document,
            Nominal::SecurityRequirement,
        ] {
            assert_eq!(Nominal::parse(nominal.as_str()), Some(nominal));
        }
        assert_eq!(Nominal::parse("NotARole"), None);
    }

    #[test]
    fn test_wildcard_roles() {
        assert_eq!(Nominal::Paths.entry_role(), Some(Nominal::PathItem));
        assert_eq!(Nominal::Schemas.entry_role(), Some(Nominal::Schema));
        assert_eq!(Nominal::Callback.entry_role(), Some(Nominal::PathItem));
        assert_eq!(Nominal::Schema.entry_role(), None);

        assert_eq!(Nominal::Parameters.item_role(), Some(Nominal::Parameter));
        assert_eq!(Nominal::TagArray.item_role(), Some(Nominal::Tag));
        assert_eq!(Nominal::Paths.item_role(), None);
    }

    #[test]
    fn test_field_roles() {
        assert_eq!(
            Nominal::Document.field_role("components"),
            Some(FieldRole::One(Nominal::Components))
        );
        assert_eq!(
            Nominal::Schema.field_role("properties"),
            Some(FieldRole::Map(Nominal::Schema))
        );
        assert_eq!(
            Nominal::Operation.field_role("servers"),
            Some(FieldRole::Each(Nominal::Server))
        );
        assert_eq!(Nominal::Schema.field_role("description"), None);
        assert_eq!(Nominal::Document.field_role("openapi"), None);
    }
}
