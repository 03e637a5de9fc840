//! Minijinja renderer for KB artifacts: item pages, synthesis documents,
//! the root README and the static HTML index.

use std::collections::BTreeMap;

use chrono::Utc;
use minijinja::Environment;
use serde::Serialize;

use magpie_core::item::Item;
use magpie_ports::error::PortError;
use magpie_ports::traits::Renderer;

const ITEM_TEMPLATE: &str = "\
# {{ display_title }}

> {{ description }}

**Source**: [{{ source_url }}]({{ source_url }})
**Category**: {{ main_category }} / {{ sub_category }}

{{ content }}
{% if image_descriptions %}
## Media

{% for desc in image_descriptions %}![{{ desc }}](./{{ media_files[loop.index0] }})
*{{ desc }}*

{% endfor %}{% endif %}---
*Knowledge base item {{ item_id }}, generated {{ generated_at }}.*
";

const SYNTHESIS_TEMPLATE: &str = "\
# Synthesis: {{ main_category }} / {{ sub_category }}

_Drawn from {{ item_count }} items._

{{ body }}

---
*Generated {{ generated_at }}.*
";

const INDEX_TEMPLATE: &str = "\
# Knowledge Base

{{ total_items }} items across {{ category_count }} categories.

{% for cat in categories %}## {{ cat.name }} ({{ cat.count }})

{% for sub in cat.subs %}### {{ sub.name }}

{% for item in sub.items %}- [{{ item.title }}]({{ item.path }}){% if item.description %}: {{ item.description }}{% endif %}
{% endfor %}
{% endfor %}{% endfor %}---
*Generated {{ generated_at }}.*
";

const HTML_INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Knowledge Base</title>
</head>
<body>
<h1>Knowledge Base</h1>
<p>{{ total_items }} items across {{ category_count }} categories.</p>
{% for cat in categories %}<h2>{{ cat.name }} ({{ cat.count }})</h2>
{% for sub in cat.subs %}<h3>{{ sub.name }}</h3>
<ul>
{% for item in sub.items %}<li><a href="{{ item.path }}">{{ item.title }}</a></li>
{% endfor %}</ul>
{% endfor %}{% endfor %}
</body>
</html>
"#;

#[derive(Serialize)]
struct IndexItem {
    title: String,
    path: String,
    description: String,
}

#[derive(Serialize)]
struct IndexSub {
    name: String,
    count: usize,
    items: Vec<IndexItem>,
}

#[derive(Serialize)]
struct IndexCategory {
    name: String,
    count: usize,
    subs: Vec<IndexSub>,
}

pub struct KbRenderer {
    env: Environment<'static>,
}

impl KbRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("item", ITEM_TEMPLATE)
            .expect("item template is valid");
        env.add_template("synthesis", SYNTHESIS_TEMPLATE)
            .expect("synthesis template is valid");
        env.add_template("index", INDEX_TEMPLATE)
            .expect("index template is valid");
        env.add_template("html_index", HTML_INDEX_TEMPLATE)
            .expect("html index template is valid");
        Self { env }
    }

    fn render_template(
        &self,
        name: &str,
        ctx: minijinja::value::Value,
    ) -> Result<String, PortError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| PortError::Render(e.to_string()))?;
        template
            .render(ctx)
            .map_err(|e| PortError::Render(e.to_string()))
    }

    fn index_categories(items: &[Item]) -> (Vec<IndexCategory>, usize) {
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<&Item>>> = BTreeMap::new();
        let mut total = 0usize;
        for item in items {
            let (Some(main), Some(sub)) = (&item.main_category, &item.sub_category) else {
                continue;
            };
            if item.kb_file_path.is_empty() {
                continue;
            }
            grouped
                .entry(main.clone())
                .or_default()
                .entry(sub.clone())
                .or_default()
                .push(item);
            total += 1;
        }

        let categories = grouped
            .into_iter()
            .map(|(main, subs)| {
                let subs: Vec<IndexSub> = subs
                    .into_iter()
                    .map(|(sub, items)| IndexSub {
                        name: sub,
                        count: items.len(),
                        items: items
                            .into_iter()
                            .map(|item| IndexItem {
                                title: if item.kb_display_title.is_empty() {
                                    item.item_id.clone()
                                } else {
                                    item.kb_display_title.clone()
                                },
                                path: item.kb_file_path.clone(),
                                description: item.kb_description.clone(),
                            })
                            .collect(),
                    })
                    .collect();
                IndexCategory {
                    count: subs.iter().map(|s| s.count).sum(),
                    name: main,
                    subs,
                }
            })
            .collect();
        (categories, total)
    }
}

impl Default for KbRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for KbRenderer {
    fn render_item(&self, item: &Item) -> Result<String, PortError> {
        let media_files: Vec<String> = item
            .kb_media_paths
            .iter()
            .map(|p| {
                std::path::Path::new(p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.clone())
            })
            .collect();
        self.render_template(
            "item",
            minijinja::context! {
                item_id => item.item_id,
                display_title => if item.kb_display_title.is_empty() {
                    item.item_id.clone()
                } else {
                    item.kb_display_title.clone()
                },
                description => item.kb_description,
                content => if item.kb_content.is_empty() {
                    item.full_text.clone()
                } else {
                    item.kb_content.clone()
                },
                source_url => item.source_url,
                main_category => item.main_category.clone().unwrap_or_default(),
                sub_category => item.sub_category.clone().unwrap_or_default(),
                image_descriptions => item.image_descriptions,
                media_files => media_files,
                generated_at => Utc::now().to_rfc3339(),
            },
        )
    }

    fn render_synthesis(
        &self,
        main_category: &str,
        sub_category: &str,
        body: &str,
        item_count: usize,
    ) -> Result<String, PortError> {
        self.render_template(
            "synthesis",
            minijinja::context! {
                main_category,
                sub_category,
                body,
                item_count,
                generated_at => Utc::now().to_rfc3339(),
            },
        )
    }

    fn render_index(&self, items: &[Item]) -> Result<String, PortError> {
        let (categories, total) = Self::index_categories(items);
        let category_count = categories.len();
        self.render_template(
            "index",
            minijinja::context! {
                categories => categories,
                total_items => total,
                category_count => category_count,
                generated_at => Utc::now().to_rfc3339(),
            },
        )
    }

    fn render_html_index(&self, items: &[Item]) -> Result<String, PortError> {
        let (categories, total) = Self::index_categories(items);
        let category_count = categories.len();
        self.render_template(
            "html_index",
            minijinja::context! {
                categories => categories,
                total_items => total,
                category_count => category_count,
                generated_at => Utc::now().to_rfc3339(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb_item(id: &str, main: &str, sub: &str) -> Item {
        let mut item = Item::new(id);
        item.main_category = Some(main.to_string());
        item.sub_category = Some(sub.to_string());
        item.kb_display_title = format!("Title for {id}");
        item.kb_description = "A short description".to_string();
        item.kb_content = "Body content here".to_string();
        item.kb_file_path = format!("{main}/{sub}/{id}/README.md");
        item.source_url = format!("https://example.com/{id}");
        item
    }

    #[test]
    fn item_page_embeds_item_id() {
        let renderer = KbRenderer::new();
        let item = kb_item("i1", "software", "testing");
        let page = renderer.render_item(&item).unwrap();

        assert!(page.contains("i1"), "page must reference the item id");
        assert!(page.contains("# Title for i1"));
        assert!(page.contains("software / testing"));
        assert!(page.contains("https://example.com/i1"));
        assert!(!page.contains("## Media"), "no media section without images");
    }

    #[test]
    fn item_page_lists_image_descriptions() {
        let renderer = KbRenderer::new();
        let mut item = kb_item("i2", "software", "testing");
        item.image_descriptions = vec!["a diagram of X".to_string()];
        item.kb_media_paths = vec!["software/testing/i2/media_1.jpg".to_string()];

        let page = renderer.render_item(&item).unwrap();
        assert!(page.contains("## Media"));
        assert!(page.contains("a diagram of X"));
        assert!(page.contains("./media_1.jpg"));
    }

    #[test]
    fn index_groups_by_category_with_counts() {
        let renderer = KbRenderer::new();
        let items = vec![
            kb_item("a", "software", "testing"),
            kb_item("b", "software", "testing"),
            kb_item("c", "software", "rust"),
            kb_item("d", "hardware", "keyboards"),
        ];
        let index = renderer.render_index(&items).unwrap();

        assert!(index.contains("4 items across 2 categories"));
        assert!(index.contains("## software (3)"));
        assert!(index.contains("## hardware (1)"));
        assert!(index.contains("### testing"));
        assert!(index.contains("[Title for a](software/testing/a/README.md)"));
    }

    #[test]
    fn index_skips_uncategorized_items() {
        let renderer = KbRenderer::new();
        let items = vec![kb_item("a", "software", "testing"), Item::new("raw")];
        let index = renderer.render_index(&items).unwrap();
        assert!(index.contains("1 items across 1 categories"));
        assert!(!index.contains("raw"));
    }

    #[test]
    fn synthesis_document_carries_count_and_body() {
        let renderer = KbRenderer::new();
        let doc = renderer
            .render_synthesis("software", "testing", "## Themes\nMocking.", 5)
            .unwrap();
        assert!(doc.contains("# Synthesis: software / testing"));
        assert!(doc.contains("Drawn from 5 items"));
        assert!(doc.contains("## Themes"));
    }

    #[test]
    fn html_index_is_a_document() {
        let renderer = KbRenderer::new();
        let html = renderer
            .render_html_index(&[kb_item("a", "software", "testing")])
            .unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<a href=\"software/testing/a/README.md\">"));
    }
}
