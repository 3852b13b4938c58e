use crate::context::MatContext;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Rotate the axes by one position: shape `[s0, .., sn-1]` becomes
    /// `[sn-1, s0, .., sn-2]` and the element at `c` moves to `c` rotated
    /// the same way.
    ///
    /// For rank 2 this is the ordinary matrix transpose. For higher ranks
    /// it takes `rank` applications to get back the original layout.
    pub fn transpose(&self) -> Result<Tensor> {
        if self.ndims() < 2 {
            return Ok(self.deep_copy());
        }
        let rotated = self.shape().rotated();
        let mut out = Tensor::new(rotated.clone())?;
        for (linear, &v) in self.data().iter().enumerate() {
            let mut coord = self.index_to_coord(linear)?;
            coord.rotate_right(1);
            let offset = rotated.coord_to_offset(&coord)?;
            out.data_mut()[offset] = v;
        }
        Ok(out)
    }
}

impl MatContext<'_> {
    /// See [`Tensor::transpose`]; runs on the host.
    pub fn transpose(&self, t: &Tensor) -> Result<Tensor> {
        t.transpose()
    }
}
