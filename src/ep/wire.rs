// Transfer form of the factorized representation: the flat
// little-endian layout handed across the host boundary. Sections, in
// order: variable count, factor count, per-factor row lengths,
// concatenated support sets, concatenated coefficients, then the beta
// and pi message arrays in the same entry order. The bivariate variant
// appends the precision-variable count, the map k(j) and the (a, c)
// message arrays. Integers are 32-bit signed, reals IEEE-754 doubles,
// all little-endian. Construction and use share one process; the
// layout is not versioned.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::representation::{FactorizedRep, PrecisionRep, RepError};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("transfer stream error")]
    Io(#[from] io::Error),
    #[error("negative count {0} in transfer stream")]
    NegativeCount(i32),
    #[error("count {0} exceeds the 32-bit transfer limit")]
    CountTooLarge(usize),
    #[error(transparent)]
    Rep(#[from] RepError),
}

fn read_i32(reader: &mut impl Read) -> Result<i32, WireError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_count(reader: &mut impl Read) -> Result<usize, WireError> {
    let value = read_i32(reader)?;
    if value < 0 {
        return Err(WireError::NegativeCount(value));
    }
    Ok(value as usize)
}

fn read_counts(reader: &mut impl Read, len: usize) -> Result<Vec<usize>, WireError> {
    (0..len).map(|_| read_count(reader)).collect()
}

fn read_f64s(reader: &mut impl Read, len: usize) -> Result<Vec<f64>, WireError> {
    let mut out = Vec::with_capacity(len);
    let mut buf = [0u8; 8];
    for _ in 0..len {
        reader.read_exact(&mut buf)?;
        out.push(f64::from_le_bytes(buf));
    }
    Ok(out)
}

fn write_count(writer: &mut impl Write, value: usize) -> Result<(), WireError> {
    let value = i32::try_from(value).map_err(|_| WireError::CountTooLarge(value))?;
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_f64s(writer: &mut impl Write, values: &[f64]) -> Result<(), WireError> {
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Reads a univariate representation from the transfer stream.
pub fn decode_univariate(reader: &mut impl Read) -> Result<FactorizedRep, WireError> {
    let num_variables = read_count(reader)?;
    let num_potentials = read_count(reader)?;
    let row_sizes = read_counts(reader, num_potentials)?;
    let nnz = row_sizes.iter().sum();
    let var_index = read_counts(reader, nnz)?;
    let coeff = read_f64s(reader, nnz)?;
    let msg_beta = read_f64s(reader, nnz)?;
    let msg_pi = read_f64s(reader, nnz)?;
    Ok(FactorizedRep::from_parts(
        num_variables,
        &row_sizes,
        var_index,
        coeff,
        msg_beta,
        msg_pi,
    )?)
}

/// Writes a univariate representation to the transfer stream.
pub fn encode_univariate(
    rep: &FactorizedRep,
    writer: &mut impl Write,
) -> Result<(), WireError> {
    write_count(writer, rep.num_variables())?;
    write_count(writer, rep.num_potentials())?;
    for size in rep.row_sizes() {
        write_count(writer, size)?;
    }
    for &i in rep.var_indices() {
        write_count(writer, i)?;
    }
    write_f64s(writer, rep.coefficients())?;
    write_f64s(writer, rep.messages_beta())?;
    write_f64s(writer, rep.messages_pi())?;
    Ok(())
}

/// Reads a bivariate-precision representation: the univariate sections
/// followed by the precision block.
pub fn decode_bivar_prec(
    reader: &mut impl Read,
) -> Result<(FactorizedRep, PrecisionRep), WireError> {
    let rep = decode_univariate(reader)?;
    let num_prec_vars = read_count(reader)?;
    let prec_var = read_counts(reader, rep.num_potentials())?;
    let msg_a = read_f64s(reader, rep.num_potentials())?;
    let msg_c = read_f64s(reader, rep.num_potentials())?;
    let prec = PrecisionRep::from_parts(num_prec_vars, prec_var, msg_a, msg_c)?;
    Ok((rep, prec))
}

pub fn encode_bivar_prec(
    rep: &FactorizedRep,
    prec: &PrecisionRep,
    writer: &mut impl Write,
) -> Result<(), WireError> {
    encode_univariate(rep, writer)?;
    write_count(writer, prec.num_prec_vars())?;
    for &k in prec.prec_vars() {
        write_count(writer, k)?;
    }
    write_f64s(writer, prec.messages_a())?;
    write_f64s(writer, prec.messages_c())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_i32(bytes: &mut Vec<u8>, value: i32) {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn push_f64(bytes: &mut Vec<u8>, value: f64) {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn decodes_a_hand_built_stream() {
        // Two variables, two factors: V_0 = {0, 1}, V_1 = {1}
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 2);
        push_i32(&mut bytes, 2);
        push_i32(&mut bytes, 2);
        push_i32(&mut bytes, 1);
        for i in [0, 1, 1] {
            push_i32(&mut bytes, i);
        }
        for b in [1.0, -1.0, 2.0] {
            push_f64(&mut bytes, b);
        }
        for beta in [0.25, 0.5, -0.75] {
            push_f64(&mut bytes, beta);
        }
        for pi in [1.0, 2.0, 3.0] {
            push_f64(&mut bytes, pi);
        }

        let rep = decode_univariate(&mut bytes.as_slice()).unwrap();
        assert_eq!(rep.num_variables(), 2);
        assert_eq!(rep.num_potentials(), 2);
        assert_eq!(rep.row(0).vars, &[0, 1]);
        assert_eq!(rep.row(0).coeff, &[1.0, -1.0]);
        assert_eq!(rep.row(1).beta, &[-0.75]);
        assert_eq!(rep.row(1).pi, &[3.0]);
    }

    #[test]
    fn encode_then_decode_preserves_the_bivariate_form() {
        let mut rep = FactorizedRep::from_rows(
            3,
            vec![(vec![0, 2], vec![1.0, 0.5]), (vec![1], vec![-2.0])],
        )
        .unwrap();
        rep.row_mut(0).pi.copy_from_slice(&[0.1, 0.2]);
        rep.row_mut(1).beta[0] = -0.5;
        let prec =
            PrecisionRep::from_parts(2, vec![1, 0], vec![0.5, 0.25], vec![2.0, 4.0]).unwrap();

        let mut bytes = Vec::new();
        encode_bivar_prec(&rep, &prec, &mut bytes).unwrap();
        let (back, prec_back) = decode_bivar_prec(&mut bytes.as_slice()).unwrap();

        assert_eq!(back.num_variables(), 3);
        assert_eq!(back.var_indices(), rep.var_indices());
        assert_eq!(back.coefficients(), rep.coefficients());
        assert_eq!(back.messages_beta(), rep.messages_beta());
        assert_eq!(back.messages_pi(), rep.messages_pi());
        assert_eq!(prec_back.prec_vars(), prec.prec_vars());
        assert_eq!(prec_back.messages_a(), prec.messages_a());
        assert_eq!(prec_back.messages_c(), prec.messages_c());
    }

    #[test]
    fn bad_streams_are_rejected() {
        // Truncated after the header
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 1);
        assert!(matches!(
            decode_univariate(&mut bytes.as_slice()),
            Err(WireError::Io(_))
        ));

        // Negative factor count
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, -3);
        assert!(matches!(
            decode_univariate(&mut bytes.as_slice()),
            Err(WireError::NegativeCount(-3))
        ));

        // Variable index out of range surfaces the representation error
        let mut bytes = Vec::new();
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 1);
        push_i32(&mut bytes, 4);
        push_f64(&mut bytes, 1.0);
        push_f64(&mut bytes, 0.0);
        push_f64(&mut bytes, 0.0);
        assert!(matches!(
            decode_univariate(&mut bytes.as_slice()),
            Err(WireError::Rep(RepError::VariableOutOfRange { .. }))
        ));
    }
}
