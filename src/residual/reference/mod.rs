//! Published steady-state binding curves the model is fitted against.
//! Responses are already normalized to their largest point.

use super::DoseResponseCurve;

/// Calcium binding by the pump, 16 points over cytosolic calcium (M)
pub const CALCIUM_BINDING: [(f64, f64); 16] = [
    (1.13465021562703E-07, 0.056698042688369),
    (1.48013728928924E-07, 0.100474048769127),
    (1.87545047401295E-07, 0.159057553309407),
    (2.37746427649773E-07, 0.23871761522272),
    (2.86177839072689E-07, 0.30582603399111),
    (3.34581558654772E-07, 0.385634231598201),
    (3.82579504194903E-07, 0.459159901847406),
    (4.40880103529033E-07, 0.551640962566692),
    (5.15498018194447E-07, 0.63566454650982),
    (6.0268752205741E-07, 0.715472730890509),
    (7.04360511231999E-07, 0.778419740266281),
    (8.41433890215616E-07, 0.835003303161443),
    (9.8310521528177E-07, 0.885304272566714),
    (1.209326027507E-06, 0.935510990636819),
    (1.46539261994034E-06, 0.970991050011721),
    (1.92506766806173E-06, 1.0),
];

/// Phosphoenzyme formed from inorganic phosphate, 13 points over phosphate (M)
pub const PHOSPHATE_BINDING: [(f64, f64); 13] = [
    (1.03376779868233E-6, 0.08470588),
    (2.05352502645715E-6, 0.17735294),
    (3.37944980307518E-6, 0.26794118),
    (6.35162720217447E-6, 0.40382353),
    (1.06867586159251E-5, 0.54382353),
    (1.44096688378901E-5, 0.60764706),
    (2.34526541941682E-5, 0.72294118),
    (3.94597200689256E-5, 0.82176471),
    (8.37677788439386E-5, 0.90617647),
    (0.0001778279, 0.95970588),
    (0.0004079219, 0.98029412),
    (0.0006493816, 0.99264706),
    (0.0009357374, 1.0),
];

pub fn calcium_binding() -> DoseResponseCurve {
    DoseResponseCurve::from_points(&CALCIUM_BINDING)
}

pub fn phosphate_binding() -> DoseResponseCurve {
    DoseResponseCurve::from_points(&PHOSPHATE_BINDING)
}
