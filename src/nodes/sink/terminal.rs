//! Engine root

use dasp_graph::{Buffer, Input};
use crate::node::{AudioNode, ProcessContext};

/// Does nothing with its inputs.
///
/// The engine processes up to this node each block, so anything connected
/// into it (the destination, taps kept alive) gets rendered.
pub(crate) struct Terminal;

impl AudioNode for Terminal {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _inputs: &[Input],
        _outputs: &mut [Buffer],
    ) {
    }

    #[inline]
    fn num_inputs(&self) -> usize { usize::MAX }

    #[inline]
    fn num_outputs(&self) -> usize { 0 }
}
