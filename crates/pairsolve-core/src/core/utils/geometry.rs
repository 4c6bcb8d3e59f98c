use nalgebra::{Point3, Vector3};

/// Component of `v` orthogonal to the unit direction `dir`.
pub fn orthogonal_component(v: &Vector3<f64>, dir: &Vector3<f64>) -> Vector3<f64> {
    v - dir * dir.dot(v)
}

/// A unit vector perpendicular to `dir`, chosen deterministically by
/// crossing with the coordinate axis along the smallest component of
/// `dir`.  `dir` must not be the zero vector.
pub fn canonical_perpendicular(dir: &Vector3<f64>) -> Vector3<f64> {
    let abs = dir.abs();
    let smallest = if abs.x <= abs.y && abs.x <= abs.z {
        Vector3::x()
    } else if abs.y <= abs.z {
        Vector3::y()
    } else {
        Vector3::z()
    };
    dir.cross(&smallest).normalize()
}

/// Center of mass of a set of points; the origin for an empty set.
pub fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len() as f64)
}
