use crate::handler::{Advance, BuildContext, Handler, HandlerError};
use crate::record::{escape_html, keys, Content, PageRecord};
use async_trait::async_trait;
use pagewright_types::{Attrs, Value};

const SITEMAP_URL: &str = "/sitemap.xml";

/// Emits `/sitemap.xml` once the first round of pages is known
pub struct Sitemap {
    base_url: String,
}

impl Sitemap {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, pages: &[PageRecord]) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );
        for page in pages {
            let (Some(url), Some(output_path)) = (page.url(), page.output_path()) else {
                continue;
            };
            if !output_path.ends_with(".html") {
                continue;
            }
            xml.push_str("  <url>\n");
            xml.push_str(&format!(
                "    <loc>{}</loc>\n",
                escape_html(&format!("{}{}", self.base_url, url))
            ));
            if let Some(date) = page.date() {
                xml.push_str(&format!("    <lastmod>{}</lastmod>\n", escape_html(date)));
            }
            xml.push_str("  </url>\n");
        }
        xml.push_str("</urlset>\n");
        xml
    }
}

#[async_trait]
impl Handler for Sitemap {
    fn name(&self) -> &str {
        "sitemap"
    }

    fn claims(&self, _record: &PageRecord) -> bool {
        false
    }

    async fn advance(
        &self,
        _cx: &BuildContext,
        _record: &PageRecord,
    ) -> Result<Option<Advance>, HandlerError> {
        Ok(None)
    }

    async fn after_initial_pass(&self, cx: &BuildContext) -> Result<Vec<PageRecord>, HandlerError> {
        let xml = self.render(&cx.pages.snapshot());
        let mut attrs = Attrs::new();
        attrs.insert(keys::URL.to_string(), SITEMAP_URL.into());
        attrs.insert(keys::OUTPUT_PATH.to_string(), SITEMAP_URL.into());
        attrs.insert(keys::MIME_TYPE.to_string(), "application/xml".into());
        attrs.insert(keys::HANDLERS.to_string(), Value::array(Vec::new()));
        let record = PageRecord::new("sitemap.xml", attrs).with_content(Content::Text(xml));
        Ok(vec![record])
    }
}
