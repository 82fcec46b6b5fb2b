//! Axis-aligned bounding box with double precision.

use glam::DVec3;

/// Double-precision axis-aligned bounding box.
///
/// Used for octree regions, bucket grids, and whole-dataset bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
	/// Minimum corner (inclusive).
	pub min: DVec3,
	/// Maximum corner (inclusive).
	pub max: DVec3,
}

impl Aabb {
	/// Create a new AABB from min and max corners.
	///
	/// # Panics
	/// Debug-asserts that min <= max on all axes.
	pub fn new(min: DVec3, max: DVec3) -> Self {
		debug_assert!(
			min.x <= max.x && min.y <= max.y && min.z <= max.z,
			"AABB min must be <= max on all axes"
		);
		Self { min, max }
	}

	/// Tight box around `points`, or `None` if there are none.
	pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
		let mut iter = points.into_iter();
		let first = iter.next()?;
		let (min, max) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
		Some(Self { min, max })
	}

	/// Box from `[x0, x1, y0, y1, z0, z1]`, the layout used by bounding-box metadata.
	pub fn from_interleaved(b: [f64; 6]) -> Self {
		Self::new(DVec3::new(b[0], b[2], b[4]), DVec3::new(b[1], b[3], b[5]))
	}

	/// `[x0, x1, y0, y1, z0, z1]`.
	pub fn to_interleaved(&self) -> [f64; 6] {
		[self.min.x, self.max.x, self.min.y, self.max.y, self.min.z, self.max.z]
	}

	/// Check if this AABB overlaps with another.
	///
	/// Two AABBs overlap if they share any interior or boundary points.
	#[inline]
	pub fn overlaps(&self, other: &Aabb) -> bool {
		self.min.x <= other.max.x
			&& self.max.x >= other.min.x
			&& self.min.y <= other.max.y
			&& self.max.y >= other.min.y
			&& self.min.z <= other.max.z
			&& self.max.z >= other.min.z
	}

	/// Check if this AABB contains a point.
	#[inline]
	pub fn contains_point(&self, point: DVec3) -> bool {
		point.x >= self.min.x
			&& point.x <= self.max.x
			&& point.y >= self.min.y
			&& point.y <= self.max.y
			&& point.z >= self.min.z
			&& point.z <= self.max.z
	}

	/// Check if `other` lies entirely inside this AABB.
	#[inline]
	pub fn contains_aabb(&self, other: &Aabb) -> bool {
		self.contains_point(other.min) && self.contains_point(other.max)
	}

	/// Get the size of the AABB (max - min).
	#[inline]
	pub fn size(&self) -> DVec3 {
		self.max - self.min
	}

	/// Get the center of the AABB.
	#[inline]
	pub fn center(&self) -> DVec3 {
		(self.min + self.max) * 0.5
	}

	/// Smallest box containing both.
	#[inline]
	pub fn union(&self, other: &Aabb) -> Aabb {
		Aabb {
			min: self.min.min(other.min),
			max: self.max.max(other.max),
		}
	}

	/// Grow every side by `margin`.
	#[inline]
	pub fn padded(&self, margin: f64) -> Aabb {
		Aabb {
			min: self.min - DVec3::splat(margin),
			max: self.max + DVec3::splat(margin),
		}
	}

	/// Cube with the same center and side equal to the longest axis.
	pub fn to_cube(&self) -> Aabb {
		let half = DVec3::splat(self.size().max_element() * 0.5);
		let c = self.center();
		Aabb {
			min: c - half,
			max: c + half,
		}
	}

	/// Octant index of `point` relative to the center: bit 0 = +x, bit 1 = +y, bit 2 = +z.
	///
	/// Points on a splitting plane belong to the upper octant.
	#[inline]
	pub fn octant_of(&self, point: DVec3) -> usize {
		let c = self.center();
		(point.x >= c.x) as usize | ((point.y >= c.y) as usize) << 1 | ((point.z >= c.z) as usize) << 2
	}

	/// Bounds of one of the eight children split at the center.
	pub fn octant(&self, index: usize) -> Aabb {
		let c = self.center();
		let pick = |bit: usize, lo: f64, mid: f64, hi: f64| {
			if index & bit != 0 {
				(mid, hi)
			} else {
				(lo, mid)
			}
		};
		let (x0, x1) = pick(1, self.min.x, c.x, self.max.x);
		let (y0, y1) = pick(2, self.min.y, c.y, self.max.y);
		let (z0, z1) = pick(4, self.min.z, c.z, self.max.z);
		Aabb {
			min: DVec3::new(x0, y0, z0),
			max: DVec3::new(x1, y1, z1),
		}
	}

	/// Squared distance from `point` to the box; zero inside.
	#[inline]
	pub fn distance_squared_to_point(&self, point: DVec3) -> f64 {
		let clamped = point.clamp(self.min, self.max);
		clamped.distance_squared(point)
	}

	/// Nearest point of the box to `point`.
	#[inline]
	pub fn clamp_point(&self, point: DVec3) -> DVec3 {
		point.clamp(self.min, self.max)
	}
}
