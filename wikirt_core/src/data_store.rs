use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::WikiResult;
use crate::config::OffsetType;
use crate::offsets::convert_offsets;
use crate::pipeline::ParamInfo;
use crate::pipeline::TemplateDict;
use crate::source_range::DomSourceRange;
use crate::tree::Node;
use crate::tree::NodeId;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Parse metadata about a node's original wikitext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataParsoid {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dsr: Option<DomSourceRange>,
	/// Opening markup as written, e.g. `{| class="x"` or `||`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub start_tag_src: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_tag_src: Option<String>,
	/// The opening markup was implied rather than written.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub auto_inserted_start: bool,
	/// The closing markup was missing from the source.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub auto_inserted_end: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub src: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pi: Option<Vec<ParamInfo>>,
}

impl DataParsoid {
	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}
}

/// The public description of a transcluded region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMw {
	pub parts: Vec<DataMwPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMwPart {
	pub template: TemplateDict,
}

impl DataMw {
	pub fn template(&self) -> Option<&TemplateDict> {
		self.parts.first().map(|part| &part.template)
	}

	pub fn template_mut(&mut self) -> Option<&mut TemplateDict> {
		self.parts.first_mut().map(|part| &mut part.template)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
	#[serde(default)]
	pub parsoid: DataParsoid,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mw: Option<DataMw>,
}

/// One half of a page bundle: node data keyed by exported element id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleSection {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub counter: Option<i64>,
	#[serde(default)]
	pub ids: BTreeMap<String, serde_json::Value>,
}

/// Node data collected for serialization outside of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageBundle {
	pub parsoid: BundleSection,
	pub mw: BundleSection,
}

impl Default for PageBundle {
	fn default() -> Self {
		Self {
			parsoid: BundleSection {
				counter: Some(-1),
				ids: BTreeMap::new(),
			},
			mw: BundleSection::default(),
		}
	}
}

impl PageBundle {
	/// The next exported element id.
	fn next_id(&mut self) -> String {
		let counter = self.parsoid.counter.unwrap_or(-1) + 1;
		self.parsoid.counter = Some(counter);
		format!("mw{counter}")
	}
}

/// Owns the data of every node in one document, keyed by node id.
#[derive(Debug, Clone)]
pub struct DataStore {
	objects: BTreeMap<NodeId, NodeData>,
	next_id: usize,
	page_bundle: PageBundle,
	transclusion_meta_depths: BTreeMap<String, usize>,
	generation: u64,
}

impl Default for DataStore {
	fn default() -> Self {
		Self::new()
	}
}

impl DataStore {
	pub fn new() -> Self {
		Self {
			objects: BTreeMap::new(),
			next_id: 0,
			page_bundle: PageBundle::default(),
			transclusion_meta_depths: BTreeMap::new(),
			generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
		}
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn get(&self, id: NodeId) -> Option<&NodeData> {
		self.objects.get(&id)
	}

	pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
		self.objects.get_mut(&id)
	}

	/// Store `data` under a fresh id.
	pub fn put(&mut self, data: NodeData) -> NodeId {
		let id = NodeId(self.next_id);
		self.next_id += 1;
		self.objects.insert(id, data);
		id
	}

	pub fn set(&mut self, id: NodeId, data: NodeData) {
		self.objects.insert(id, data);
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}

	pub fn page_bundle(&self) -> &PageBundle {
		&self.page_bundle
	}

	/// Swap in a new page bundle, returning the previous one.
	pub fn replace_page_bundle(&mut self, bundle: PageBundle) -> PageBundle {
		std::mem::replace(&mut self.page_bundle, bundle)
	}

	pub fn set_transclusion_depth(&mut self, about: impl Into<String>, depth: usize) {
		self.transclusion_meta_depths.insert(about.into(), depth);
	}

	/// Nesting depth of the transclusion markers with this `about` id.
	pub fn transclusion_depth(&self, about: &str) -> Option<usize> {
		self.transclusion_meta_depths.get(about).copied()
	}

	/// Drop every source range, for content whose offsets do not point into
	/// the page.
	pub fn strip_dsr(&mut self) {
		for data in self.objects.values_mut() {
			data.parsoid.dsr = None;
		}
	}

	/// Collect the data of every element under `root` into the page bundle,
	/// keyed by freshly assigned `mwN` ids. Source ranges are converted from
	/// bytes to `offset_type`. Returns the id assigned to each element.
	pub fn export_page_bundle(
		&mut self,
		root: &Node,
		source: &str,
		offset_type: OffsetType,
	) -> WikiResult<BTreeMap<NodeId, String>> {
		let mut exported = BTreeMap::new();

		for node in root.descendants() {
			if node.name().is_none() {
				continue;
			}

			let Some(data) = self.objects.get(&node.id()) else {
				continue;
			};

			let mut parsoid = data.parsoid.clone();
			if let Some(dsr) = &mut parsoid.dsr {
				let mut offsets = [dsr.start, dsr.end, dsr.inner_start(), dsr.inner_end()];
				convert_offsets(source, OffsetType::Byte, offset_type, &mut offsets);
				let [start, end, inner_start, inner_end] = offsets;
				*dsr = DomSourceRange::new(
					start,
					end,
					inner_start.saturating_sub(start),
					end.saturating_sub(inner_end),
				);
			}
			let mw = data.mw.clone();

			let id = self.page_bundle.next_id();
			self.page_bundle
				.parsoid
				.ids
				.insert(id.clone(), serde_json::to_value(&parsoid)?);
			if let Some(mw) = mw {
				self.page_bundle
					.mw
					.ids
					.insert(id.clone(), serde_json::to_value(&mw)?);
			}
			exported.insert(node.id(), id);
		}

		Ok(exported)
	}
}
