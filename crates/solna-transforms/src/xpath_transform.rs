#![forbid(unsafe_code)]

//! XPath filtering (XML-DSig §6.6.3) and XPath Filter 2.0 transforms.

use crate::transform::{DataType, Operation, Transform, TransformId, TransformIo, TransformUsage};
use solna_core::{algorithm, ns, Error, Result};
use solna_xml::document::{find_child_element, in_scope_namespaces, is_element, text_content};
use solna_xml::xpath::{XPath, XPathContext};
use solna_xml::Selection;
use std::collections::HashMap;

pub static XPATH_ID: TransformId = TransformId {
    name: "xpath",
    href: algorithm::XPATH,
    usage: TransformUsage::Generic,
};

pub static XPATH2_ID: TransformId = TransformId {
    name: "xpath2",
    href: algorithm::XPATH2,
    usage: TransformUsage::Generic,
};

/// An expression together with the namespace context of the element it
/// was read from.
#[derive(Debug, Clone)]
struct BoundExpr {
    xpath: XPath,
    namespaces: HashMap<String, String>,
    /// Node index of the element carrying the expression, for `here()`.
    here: usize,
}

impl BoundExpr {
    fn read(element: roxmltree::Node<'_, '_>) -> Result<Self> {
        let source = text_content(element);
        Ok(Self {
            xpath: XPath::parse(source.trim())?,
            namespaces: in_scope_namespaces(element).into_iter().collect(),
            here: element.id().get_usize(),
        })
    }

    fn context<'a, 'input>(
        &self,
        doc: &'a roxmltree::Document<'input>,
        ids: HashMap<String, roxmltree::NodeId>,
    ) -> XPathContext<'a, 'input> {
        // here() only makes sense when the filtered document is the one
        // holding the signature.
        let here = u32::try_from(self.here)
            .ok()
            .map(roxmltree::NodeId::new)
            .filter(|id| doc.get_node(*id).is_some());
        XPathContext::new(doc)
            .with_namespaces(self.namespaces.clone())
            .with_ids(ids)
            .with_here(here)
    }
}

/// Keeps each input node for which the expression is true.
#[derive(Debug, Default)]
pub struct XPathTransform {
    expr: Option<BoundExpr>,
}

impl XPathTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expression(&self) -> Option<&str> {
        self.expr.as_ref().map(|e| e.xpath.source())
    }
}

impl Transform for XPathTransform {
    fn id(&self) -> &'static TransformId {
        &XPATH_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Tree
    }

    fn output_type(&self) -> DataType {
        DataType::Tree
    }

    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        let element = find_child_element(node, ns::DSIG, ns::node::XPATH)
            .ok_or_else(|| Error::MissingElement("XPath".into()))?;
        self.expr = Some(BoundExpr::read(element)?);
        Ok(())
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        if self.expr.is_none() {
            return Err(Error::InvalidTransform("xpath: no expression".into()));
        }
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
        let Some(nodes) = io.input_nodes.take() else {
            return Ok(());
        };
        let expr = self
            .expr
            .as_ref()
            .ok_or_else(|| Error::InvalidTransform("xpath: no expression".into()))?;

        let kept = {
            let doc = nodes.document().parse_doc()?;
            let ids = nodes.document().build_id_map(&doc)?;
            let ctx = expr.context(&doc, ids);
            let mut kept = std::collections::BTreeSet::new();
            for node in doc.descendants().filter(|n| nodes.contains(*n)) {
                if expr.xpath.matches(&ctx, node)? {
                    kept.insert(node.id().get_usize());
                }
            }
            kept
        };
        log::debug!("xpath '{}' kept {} nodes", expr.xpath.source(), kept.len());
        io.output_nodes = Some(nodes.with_selection(Selection::Nodes(kept)));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Intersect,
    Subtract,
    Union,
}

/// XPath Filter 2.0: set operations over subtrees selected by each step.
#[derive(Debug, Default)]
pub struct XPath2Transform {
    steps: Vec<(Filter, BoundExpr)>,
}

impl XPath2Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl Transform for XPath2Transform {
    fn id(&self) -> &'static TransformId {
        &XPATH2_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Tree
    }

    fn output_type(&self) -> DataType {
        DataType::Tree
    }

    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        for element in node
            .children()
            .filter(|n| is_element(*n, ns::XPATH2, ns::node::XPATH))
        {
            let filter = match element.attribute(ns::attr::FILTER) {
                Some(ns::XPATH2_FILTER_INTERSECT) => Filter::Intersect,
                Some(ns::XPATH2_FILTER_SUBTRACT) => Filter::Subtract,
                Some(ns::XPATH2_FILTER_UNION) => Filter::Union,
                Some(other) => {
                    return Err(Error::Transform(format!("xpath2: unknown filter '{other}'")))
                }
                None => return Err(Error::MissingAttribute("Filter".into())),
            };
            self.steps.push((filter, BoundExpr::read(element)?));
        }
        if self.steps.is_empty() {
            return Err(Error::MissingElement("dsig-xpath:XPath".into()));
        }
        Ok(())
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidTransform("xpath2: no filter steps".into()));
        }
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
        let Some(nodes) = io.input_nodes.take() else {
            return Ok(());
        };

        let filter = {
            let doc = nodes.document().parse_doc()?;
            let ids = nodes.document().build_id_map(&doc)?;
            let mut filter = Selection::All {
                with_comments: true,
            };
            for (op, expr) in &self.steps {
                let ctx = expr.context(&doc, ids.clone());
                let selected = Selection::Subtrees(expr.xpath.select(&ctx, doc.root())?);
                filter = match op {
                    Filter::Intersect => filter.intersection(selected),
                    Filter::Subtract => filter.subtract(selected),
                    Filter::Union => filter.union(selected),
                };
            }
            filter
        };
        let selection = nodes.selection().clone().intersection(filter);
        io.output_nodes = Some(nodes.with_selection(selection));
        Ok(())
    }
}
