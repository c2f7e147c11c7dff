use image::{ImageBuffer, Pixel, Primitive};
use nalgebra as na;
use rayon::prelude::*;

use crate::types::Size;

pub trait CameraModel
where
    Self: Sync,
{
    fn width(&self) -> f64;
    fn height(&self) -> f64;
    fn project_one(&self, pt: &na::Vector3<f64>) -> na::Vector2<f64>;
    /// Ray through a pixel, on the z = 1 plane.
    fn unproject_one(&self, pt: &na::Vector2<f64>) -> na::Vector3<f64>;

    fn project(&self, p3d: &[na::Vector3<f64>]) -> Vec<Option<na::Vector2<f64>>> {
        p3d.par_iter()
            .map(|pt| {
                let p2d = self.project_one(pt);
                if !p2d[0].is_finite()
                    || !p2d[1].is_finite()
                    || p2d[0] < 0.0
                    || p2d[0] > self.width()
                    || p2d[1] < 0.0
                    || p2d[1] > self.height()
                {
                    None
                } else {
                    Some(p2d)
                }
            })
            .collect()
    }

    fn unproject(&self, p2d: &[na::Vector2<f64>]) -> Vec<na::Vector3<f64>> {
        p2d.par_iter().map(|pt| self.unproject_one(pt)).collect()
    }
}

/// Per-pixel source coordinates, row-major. NaN marks pixels without a source.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapTable {
    size: Size,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

impl RemapTable {
    pub fn size(&self) -> Size {
        self.size
    }

    pub fn source(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        let idx = y as usize * self.size.width as usize + x as usize;
        let (sx, sy) = (*self.map_x.get(idx)?, *self.map_y.get(idx)?);
        if sx.is_nan() || sy.is_nan() {
            None
        } else {
            Some((sx, sy))
        }
    }

    /// True when every pixel samples itself after rounding.
    pub fn is_identity(&self) -> bool {
        let w = self.size.width as usize;
        self.map_x
            .par_iter()
            .zip(self.map_y.par_iter())
            .enumerate()
            .all(|(idx, (x, y))| {
                x.round() as usize == idx % w && y.round() as usize == idx / w
            })
    }
}

/// Builds the table mapping each pixel of an ideal pinhole camera with
/// `projection_mat` back into the distorted image of `camera_model`.
pub fn init_undistort_map(
    camera_model: &dyn CameraModel,
    projection_mat: &na::Matrix3<f64>,
    new_w_h: Size,
) -> RemapTable {
    let fx = projection_mat[(0, 0)];
    let fy = projection_mat[(1, 1)];
    let cx = projection_mat[(0, 2)];
    let cy = projection_mat[(1, 2)];
    let p3ds: Vec<na::Vector3<f64>> = (0..new_w_h.height)
        .into_par_iter()
        .flat_map(|y| {
            (0..new_w_h.width)
                .into_par_iter()
                .map(|x| na::Vector3::new((x as f64 - cx) / fx, (y as f64 - cy) / fy, 1.0))
                .collect::<Vec<na::Vector3<f64>>>()
        })
        .collect();
    let p2ds = camera_model.project(&p3ds);
    let (map_x, map_y): (Vec<f32>, Vec<f32>) = p2ds
        .par_iter()
        .map(|xy| {
            if let Some(xy) = xy {
                (xy[0] as f32, xy[1] as f32)
            } else {
                (f32::NAN, f32::NAN)
            }
        })
        .unzip();
    RemapTable {
        size: new_w_h,
        map_x,
        map_y,
    }
}

/// Nearest-neighbour remap. Pixels without a valid source become zero.
pub fn remap<P>(src: &ImageBuffer<P, Vec<P::Subpixel>>, table: &RemapTable) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + Send + Sync,
    P::Subpixel: Send + Sync,
{
    let zeros = vec![<P::Subpixel as Primitive>::DEFAULT_MIN_VALUE; P::CHANNEL_COUNT as usize];
    let black = *P::from_slice(&zeros);
    ImageBuffer::from_par_fn(table.size.width, table.size.height, |x, y| {
        let Some((x_cor, y_cor)) = table.source(x, y) else {
            return black;
        };
        let x_cor = x_cor.round();
        let y_cor = y_cor.round();
        if x_cor < 0.0 || y_cor < 0.0 {
            return black;
        }
        let (x_cor, y_cor) = (x_cor as u32, y_cor as u32);
        if x_cor >= src.width() || y_cor >= src.height() {
            black
        } else {
            *src.get_pixel(x_cor, y_cor)
        }
    })
}
