//! Layout collaborator interface

use crate::data::{GraphEdge, GraphNode, Position};

/// Assigns positions to nodes that are new to the canvas.
///
/// The store only ever passes nodes it has not seen before; nodes already on
/// the canvas keep whatever position the user gave them.
pub trait LayoutEngine: Send + Sync {
    fn layout(&self, existing: &[GraphNode], new_nodes: Vec<GraphNode>, edges: &[GraphEdge]) -> Vec<GraphNode>;
}

/// Places new nodes on a grid below everything already on the canvas.
#[derive(Debug, Clone)]
pub struct GridLayout {
    pub columns: usize,
    pub spacing: f64,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            columns: 6,
            spacing: 180.0,
        }
    }
}

impl LayoutEngine for GridLayout {
    fn layout(&self, existing: &[GraphNode], mut new_nodes: Vec<GraphNode>, _edges: &[GraphEdge]) -> Vec<GraphNode> {
        let top = existing
            .iter()
            .map(|n| n.position.y + self.spacing)
            .fold(0.0_f64, f64::max);
        let columns = self.columns.max(1);

        for (i, node) in new_nodes.iter_mut().enumerate() {
            let col = (i % columns) as f64;
            let row = (i / columns) as f64;
            node.position = Position::new(col * self.spacing, top + row * self.spacing);
        }
        new_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Properties;

    #[test]
    fn test_grid_layout_places_below_existing() {
        let mut anchor = GraphNode::persisted("a", None, vec![], Properties::new());
        anchor.position = Position::new(0.0, 400.0);

        let fresh = (0..7)
            .map(|i| GraphNode::persisted(i.to_string(), None, vec![], Properties::new()))
            .collect();
        let placed = GridLayout::default().layout(&[anchor], fresh, &[]);

        assert_eq!(placed[0].position, Position::new(0.0, 580.0));
        assert_eq!(placed[5].position, Position::new(900.0, 580.0));
        assert_eq!(placed[6].position, Position::new(0.0, 760.0));
    }
}
