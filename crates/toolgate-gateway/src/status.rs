//! HTML status page

use serde::Serialize;
use tera::{Context, Tera};

use crate::routing::RoutingTable;

const TEMPLATE_NAME: &str = "status.html";

/// One mounted adapter as shown on the page
#[derive(Debug, Clone, Serialize)]
pub struct ServiceView {
    pub kind: String,
    pub description: String,
    pub endpoint: String,
    /// Mounted adapters are always reported available
    pub available: bool,
    pub tools: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PageView<'a> {
    addresses: &'a [String],
    port: u16,
    services: Vec<ServiceView>,
}

/// Compiled status page template
pub struct StatusPage {
    tera: Tera,
}

impl StatusPage {
    pub fn new() -> tera::Result<Self> {
        Self::from_template(include_str!("templates/status.html"))
    }

    /// Compile a custom template (autoescaped like the built-in one)
    pub fn from_template(source: &str) -> tera::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source)?;
        tera.autoescape_on(vec![".html"]);
        tera.set_escape_fn(escape_markup);
        Ok(Self { tera })
    }

    /// Render from the live routing table
    pub fn render(
        &self,
        routes: &RoutingTable,
        addresses: &[String],
        port: u16,
    ) -> tera::Result<String> {
        let view = PageView {
            addresses,
            port,
            services: service_views(routes),
        };
        let context = Context::from_serialize(&view)?;
        self.tera.render(TEMPLATE_NAME, &context)
    }
}

/// Tera's HTML escaping with `/` left alone so mount paths stay readable
fn escape_markup(input: &str) -> String {
    tera::escape_html(input).replace("&#x2F;", "/")
}

pub(crate) fn service_views(routes: &RoutingTable) -> Vec<ServiceView> {
    routes
        .snapshot()
        .into_iter()
        .map(|(endpoint, service)| ServiceView {
            kind: service.kind().to_string(),
            description: service.description().to_string(),
            endpoint,
            available: true,
            tools: service.tools().iter().map(|t| t.summary()).collect(),
        })
        .collect()
}
